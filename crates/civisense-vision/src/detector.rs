//! ONNX object detector (YOLO-family export), run on a blocking thread
//! per call since `ort` inference is CPU-bound synchronous work -- the
//! async wrapper here mirrors the upstream service's `asyncio.to_thread`
//! dispatch around its synchronous predict call.

use std::sync::Arc;

use civisense_core::traits::{Detection, Detector};
use civisense_core::{Error, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokio::sync::Mutex;

use crate::preprocess::{clamp_max_dimension, label_for, load_labels, to_chw_tensor};

/// Wraps a loaded detection model. Input images are downscaled to
/// `max_image_dimension` before the model's fixed square resize, then
/// boxes below `confidence_threshold` are discarded.
pub struct OrtDetector {
    session: Arc<Mutex<Session>>,
    labels: Vec<String>,
    image_size: u32,
    max_image_dimension: u32,
    confidence_threshold: f32,
}

impl OrtDetector {
    /// Loads the ONNX model at `model_path` and its sibling label file.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file cannot be loaded or parsed.
    pub fn load(
        model_path: &str,
        labels_path: &str,
        image_size: u32,
        max_image_dimension: u32,
        confidence_threshold: f32,
    ) -> Result<Self> {
        let session = Session::builder()
            .map_err(|err| Error::Inference(err.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| Error::Inference(err.to_string()))?
            .commit_from_file(model_path)
            .map_err(|err| Error::Inference(err.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: load_labels(labels_path),
            image_size,
            max_image_dimension,
            confidence_threshold,
        })
    }
}

#[async_trait::async_trait]
impl Detector for OrtDetector {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let clamped = clamp_max_dimension(image, self.max_image_dimension);
        let tensor = to_chw_tensor(&clamped, self.image_size);
        let edge = self.image_size as usize;
        let labels = self.labels.clone();
        let threshold = self.confidence_threshold;
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut session = session.blocking_lock();
            run_detection(&mut session, tensor, edge, &labels, threshold)
        })
        .await
        .map_err(|err| Error::Inference(err.to_string()))?
    }
}

/// Shape: `[1, 84, N]` (4 box coords + 80 class scores), the standard
/// single-class-head YOLOv8 export layout. Each of the `N` anchors is
/// scored by its highest class probability.
fn run_detection(
    session: &mut Session,
    tensor: Vec<f32>,
    edge: usize,
    labels: &[String],
    threshold: f32,
) -> Result<Vec<Detection>> {
    let input = Value::from_array(([1_usize, 3, edge, edge], tensor))
        .map_err(|err| Error::Inference(err.to_string()))?;
    let outputs = session
        .run(ort::inputs!["images" => input])
        .map_err(|err| Error::Inference(err.to_string()))?;

    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|err| Error::Inference(err.to_string()))?;
    if shape.len() != 3 {
        return Err(Error::Inference(format!(
            "unexpected detector output rank {}",
            shape.len()
        )));
    }
    let attrs = shape[1] as usize;
    let anchors = shape[2] as usize;
    let num_classes = attrs.saturating_sub(4);

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0_usize;
        let mut best_score = 0.0_f32;
        for class in 0..num_classes {
            let score = data[(4 + class) * anchors + anchor];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score >= threshold {
            detections.push(Detection {
                label: label_for(labels, best_class),
                confidence: best_score,
            });
        }
    }

    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    Ok(detections)
}
