//! CiviSense Core
//!
//! Domain types, pure decision logic, and the async trait seams that the
//! civic-complaint triage pipeline is built from: the priority engine
//! (text/geo/cluster/time scoring), the duplicate and semantic validator,
//! runtime telemetry, configuration, and the document-store/inference
//! traits that `civisense-store`, `civisense-vision`, and
//! `civisense-engine` implement and consume.
//!
//! Nothing in this crate performs I/O directly -- every boundary with the
//! outside world (MongoDB, an HTTP image fetch, an ONNX Runtime session)
//! is expressed as a trait in [`traits`], so the scoring and validation
//! logic can be exercised without a network or a model file.

pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod math_utils;
pub mod priority;
pub mod runtime;
pub mod text_scoring;
pub mod traits;
pub mod validator;

pub use config::Settings;
pub use domain::{
    AiMeta, AiProcessingStatus, BlacklistEntry, Category, Complaint, ComplaintImage,
    DetectionSummary, GeoPoint, Priority, SensitiveLocation,
};
pub use error::{Error, Result};
pub use runtime::{RuntimeStats, RuntimeStatsSnapshot};
pub use traits::{ClassificationResult, Detection, DocumentStore, DuplicateCandidate};
