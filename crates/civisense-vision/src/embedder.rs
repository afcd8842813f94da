//! ONNX feature embedder (MobileNetV2 backbone with a global-average-pool
//! head, the same topology the classifier's softmax head sits on, exported
//! separately since `ort` sessions are loaded per service).

use std::sync::Arc;

use civisense_core::traits::Embedder;
use civisense_core::{Error, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokio::sync::Mutex;

use crate::preprocess::{clamp_max_dimension, to_normalized_chw_tensor};

const INPUT_EDGE: u32 = 224;

/// Wraps a loaded feature-extraction export, emitting an L2-normalized
/// vector per call.
pub struct OrtEmbedder {
    session: Arc<Mutex<Session>>,
    max_image_dimension: u32,
}

impl OrtEmbedder {
    /// Loads the ONNX model at `model_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file cannot be loaded or parsed.
    pub fn load(model_path: &str, max_image_dimension: u32) -> Result<Self> {
        let session = Session::builder()
            .map_err(|err| Error::Inference(err.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| Error::Inference(err.to_string()))?
            .commit_from_file(model_path)
            .map_err(|err| Error::Inference(err.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            max_image_dimension,
        })
    }
}

#[async_trait::async_trait]
impl Embedder for OrtEmbedder {
    async fn embed(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let clamped = clamp_max_dimension(image, self.max_image_dimension);
        let tensor = to_normalized_chw_tensor(&clamped, INPUT_EDGE);
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut session = session.blocking_lock();
            run_embedding(&mut session, tensor, INPUT_EDGE as usize)
        })
        .await
        .map_err(|err| Error::Inference(err.to_string()))?
    }
}

fn run_embedding(session: &mut Session, tensor: Vec<f32>, edge: usize) -> Result<Vec<f32>> {
    let input = Value::from_array(([1_usize, 3, edge, edge], tensor))
        .map_err(|err| Error::Inference(err.to_string()))?;
    let outputs = session
        .run(ort::inputs!["input" => input])
        .map_err(|err| Error::Inference(err.to_string()))?;

    let (_, features) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|err| Error::Inference(err.to_string()))?;

    Ok(l2_normalize(features))
}

fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|value| value / norm).collect()
}
