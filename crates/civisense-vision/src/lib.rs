//! CiviSense Vision
//!
//! Concrete adapters for the three image-facing trait seams in
//! `civisense-core`: fetching a complaint's attached image over HTTP, and
//! running the detector, classifier, and embedder CPU inference stages
//! against it via `ort`. Every call offloads its blocking CPU work with
//! `tokio::task::spawn_blocking`, keeping the async pipeline in
//! `civisense-engine` non-blocking.

mod classifier;
mod detector;
mod embedder;
mod image_fetcher;
mod preprocess;

pub use classifier::OrtClassifier;
pub use detector::OrtDetector;
pub use embedder::OrtEmbedder;
pub use image_fetcher::ReqwestImageFetcher;
