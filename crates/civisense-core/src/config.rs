//! Typed runtime configuration, loaded from environment variables.
//!
//! Every option in the design spec's configuration table gets a field here
//! with the documented default. Unset variables fall back to the default;
//! variables that are set but fail to parse are a startup error rather than
//! a silent fallback, so misconfiguration is caught at boot.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Process-wide settings realizing the configuration table.
#[derive(Debug, Clone)]
pub struct Settings {
    /// MongoDB connection string. Required; no default.
    pub mongo_uri: String,
    /// Database name housing `complaints`, `sensitive_locations`, `ai_blacklist`.
    pub mongo_database: String,
    /// Bind address for the monitoring HTTP surface.
    pub monitoring_bind_addr: String,

    /// Store connect timeout.
    pub mongo_server_selection_timeout_ms: u64,
    /// Initial connection budget.
    pub mongo_connect_timeout_ms: u64,
    /// Permit replica-set -> standalone URI rewrite on connect failure.
    pub mongo_allow_standalone_fallback: bool,

    /// Detection score floor.
    pub yolo_confidence_threshold: f32,
    /// Detector input size (pixels, square).
    pub yolo_image_size: u32,
    /// Pre-detect downscale cap, applied to all three inference stages.
    pub yolo_max_image_dimension: u32,
    /// Detection floor for the semantic/severity agreement check.
    pub yolo_min_confidence_for_severity: f32,
    /// Path to the detector's exported ONNX model file.
    pub yolo_model_path: String,
    /// Path to the detector's class label list, one label per line, ordered
    /// by output index.
    pub yolo_labels_path: String,
    /// Path to the classifier/embedder's exported ONNX model file.
    pub mobilenet_model_path: String,
    /// Path to the classifier's class label list, one label per line,
    /// ordered by output index.
    pub mobilenet_labels_path: String,

    /// HTTP total timeout for image fetch.
    pub image_download_timeout_seconds: u64,
    /// Image size cap in bytes.
    pub image_max_bytes: u64,

    /// Legacy school-boost radius, retained for parity with the geo multiplier's rule table.
    pub school_radius_meters: u32,

    /// Minimum similarity to count as a duplicate.
    pub duplicate_similarity_threshold: f64,
    /// Candidate lookback window, in days.
    pub duplicate_lookback_days: i64,
    /// Max candidates scanned per duplicate check.
    pub duplicate_compare_limit: i64,

    /// Reconciler sweep period.
    pub retry_interval_seconds: u64,
    /// Per-cid retry cap.
    pub max_retry_attempts: u32,
    /// Reconciler sweep page size.
    pub retry_batch_size: i64,

    /// Per-stage inference timeout. Resolved open question (DESIGN.md): the
    /// source imposes none; this implementation adds one and treats a
    /// timeout identically to any other isolated per-stage inference
    /// failure.
    pub inference_timeout_seconds: u64,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `CIVISENSE_MONGO_URI` is unset, or if any
    /// set variable fails to parse as its expected type.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mongo_uri: require_env("CIVISENSE_MONGO_URI")?,
            mongo_database: env_or("CIVISENSE_MONGO_DATABASE", "civisense".to_string())?,
            monitoring_bind_addr: env_or(
                "CIVISENSE_MONITORING_BIND_ADDR",
                "0.0.0.0:8080".to_string(),
            )?,

            mongo_server_selection_timeout_ms: env_parsed(
                "CIVISENSE_MONGO_SERVER_SELECTION_TIMEOUT_MS",
                5000,
            )?,
            mongo_connect_timeout_ms: env_parsed("CIVISENSE_MONGO_CONNECT_TIMEOUT_MS", 10_000)?,
            mongo_allow_standalone_fallback: env_parsed(
                "CIVISENSE_MONGO_ALLOW_STANDALONE_FALLBACK",
                true,
            )?,

            yolo_confidence_threshold: env_parsed("CIVISENSE_YOLO_CONFIDENCE_THRESHOLD", 0.25)?,
            yolo_image_size: env_parsed("CIVISENSE_YOLO_IMAGE_SIZE", 640)?,
            yolo_max_image_dimension: env_parsed("CIVISENSE_YOLO_MAX_IMAGE_DIMENSION", 1024)?,
            yolo_min_confidence_for_severity: env_parsed(
                "CIVISENSE_YOLO_MIN_CONFIDENCE_FOR_SEVERITY",
                0.4,
            )?,
            yolo_model_path: env_or(
                "CIVISENSE_YOLO_MODEL_PATH",
                "models/yolov8n.onnx".to_string(),
            )?,
            yolo_labels_path: env_or(
                "CIVISENSE_YOLO_LABELS_PATH",
                "models/coco_classes.txt".to_string(),
            )?,
            mobilenet_model_path: env_or(
                "CIVISENSE_MOBILENET_MODEL_PATH",
                "models/mobilenetv2.onnx".to_string(),
            )?,
            mobilenet_labels_path: env_or(
                "CIVISENSE_MOBILENET_LABELS_PATH",
                "models/imagenet_classes.txt".to_string(),
            )?,

            image_download_timeout_seconds: env_parsed(
                "CIVISENSE_IMAGE_DOWNLOAD_TIMEOUT_SECONDS",
                15,
            )?,
            image_max_bytes: env_parsed("CIVISENSE_IMAGE_MAX_BYTES", 10 * 1024 * 1024)?,

            school_radius_meters: env_parsed("CIVISENSE_SCHOOL_RADIUS_METERS", 2000)?,

            duplicate_similarity_threshold: env_parsed(
                "CIVISENSE_DUPLICATE_SIMILARITY_THRESHOLD",
                0.92,
            )?,
            duplicate_lookback_days: env_parsed("CIVISENSE_DUPLICATE_LOOKBACK_DAYS", 7)?,
            duplicate_compare_limit: env_parsed("CIVISENSE_DUPLICATE_COMPARE_LIMIT", 50)?,

            retry_interval_seconds: env_parsed("CIVISENSE_RETRY_INTERVAL_SECONDS", 60)?,
            max_retry_attempts: env_parsed("CIVISENSE_MAX_RETRY_ATTEMPTS", 3)?,
            retry_batch_size: env_parsed("CIVISENSE_RETRY_BATCH_SIZE", 25)?,

            inference_timeout_seconds: env_parsed("CIVISENSE_INFERENCE_TIMEOUT_SECONDS", 30)?,
        })
    }

    /// The image download timeout as a [`Duration`].
    #[must_use]
    pub fn image_download_timeout(&self) -> Duration {
        Duration::from_secs(self.image_download_timeout_seconds)
    }

    /// The retry reconciler's sweep period as a [`Duration`].
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    /// The per-stage inference timeout as a [`Duration`].
    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_seconds)
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| Error::Config(format!("missing required environment variable {key}")))
}

fn env_or(key: &str, default: String) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Config(format!("{key} is not valid unicode")))
        }
    }
}

fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|err| Error::Config(format!("invalid value for {key}: {err}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Config(format!("{key} is not valid unicode")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Settings::from_env reads the real process environment, so tests that
    // mutate it are serialized to avoid cross-test interference.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_civisense_env() {
        for (key, _) in env::vars() {
            if key.starts_with("CIVISENSE_") {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn missing_required_uri_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_civisense_env();
        let result = Settings::from_env();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_civisense_env();
        env::set_var("CIVISENSE_MONGO_URI", "mongodb://localhost:27017/civisense");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.mongo_database, "civisense");
        assert_eq!(settings.max_retry_attempts, 3);
        assert!((settings.duplicate_similarity_threshold - 0.92).abs() < f64::EPSILON);
        env::remove_var("CIVISENSE_MONGO_URI");
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_civisense_env();
        env::set_var("CIVISENSE_MONGO_URI", "mongodb://localhost:27017/civisense");
        env::set_var("CIVISENSE_MAX_RETRY_ATTEMPTS", "not-a-number");
        let result = Settings::from_env();
        assert!(matches!(result, Err(Error::Config(_))));
        env::remove_var("CIVISENSE_MONGO_URI");
        env::remove_var("CIVISENSE_MAX_RETRY_ATTEMPTS");
    }
}
