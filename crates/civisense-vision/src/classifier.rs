//! ONNX scene classifier (MobileNetV2 export with a softmax head),
//! returning the top label plus up to two runners-up.

use std::sync::Arc;

use civisense_core::traits::{ClassificationResult, Classifier};
use civisense_core::{Error, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokio::sync::Mutex;

use crate::preprocess::{clamp_max_dimension, label_for, load_labels, to_normalized_chw_tensor};

const INPUT_EDGE: u32 = 224;
const TOP_K: usize = 3;

/// Wraps a loaded MobileNetV2 classification export.
pub struct OrtClassifier {
    session: Arc<Mutex<Session>>,
    labels: Vec<String>,
    max_image_dimension: u32,
}

impl OrtClassifier {
    /// Loads the ONNX model at `model_path` and its sibling label file.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file cannot be loaded or parsed.
    pub fn load(model_path: &str, labels_path: &str, max_image_dimension: u32) -> Result<Self> {
        let session = Session::builder()
            .map_err(|err| Error::Inference(err.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| Error::Inference(err.to_string()))?
            .commit_from_file(model_path)
            .map_err(|err| Error::Inference(err.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: load_labels(labels_path),
            max_image_dimension,
        })
    }
}

#[async_trait::async_trait]
impl Classifier for OrtClassifier {
    async fn classify(&self, image: &RgbImage) -> Result<ClassificationResult> {
        let clamped = clamp_max_dimension(image, self.max_image_dimension);
        let tensor = to_normalized_chw_tensor(&clamped, INPUT_EDGE);
        let labels = self.labels.clone();
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut session = session.blocking_lock();
            run_classification(&mut session, tensor, INPUT_EDGE as usize, &labels)
        })
        .await
        .map_err(|err| Error::Inference(err.to_string()))?
    }
}

fn run_classification(
    session: &mut Session,
    tensor: Vec<f32>,
    edge: usize,
    labels: &[String],
) -> Result<ClassificationResult> {
    let input = Value::from_array(([1_usize, 3, edge, edge], tensor))
        .map_err(|err| Error::Inference(err.to_string()))?;
    let outputs = session
        .run(ort::inputs!["input" => input])
        .map_err(|err| Error::Inference(err.to_string()))?;

    let (_, logits) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|err| Error::Inference(err.to_string()))?;

    let probabilities = softmax(logits);
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let top_labels: Vec<String> = ranked
        .iter()
        .take(TOP_K)
        .map(|(idx, _)| label_for(labels, *idx))
        .collect();

    let (label, confidence) = ranked
        .first()
        .map(|(idx, score)| (label_for(labels, *idx), *score))
        .unwrap_or_else(|| ("unknown".to_string(), 0.0));

    Ok(ClassificationResult {
        label,
        confidence,
        top_labels,
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|value| (value - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    if sum <= 0.0 {
        return exp;
    }
    exp.into_iter().map(|value| value / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn softmax_is_monotonic_with_logits() {
        let probabilities = softmax(&[0.1, 5.0, -2.0]);
        assert!(probabilities[1] > probabilities[0]);
        assert!(probabilities[0] > probabilities[2]);
    }
}
