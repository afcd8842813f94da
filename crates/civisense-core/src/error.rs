//! Error types shared by every CiviSense crate.

use thiserror::Error;

/// Failure taxonomy for the decision engine (§7 of the design spec).
///
/// Variants map onto the categories every adapter and pipeline stage can
/// produce: transient store errors, transient network errors, permanent
/// input errors, missing-capability degradation (handled, never surfaced
/// through this type), and per-inference failures.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The document store could not be reached or a query failed transiently.
    #[error("document store error: {0}")]
    Store(String),

    /// The document store connection could not be established at startup.
    #[error("failed to connect to document store: {0}")]
    StoreConnect(String),

    /// An image could not be fetched over HTTP.
    #[error("image fetch failed: {0}")]
    FetchFailed(String),

    /// The fetched resource's `Content-Type` did not indicate an image.
    #[error("resource is not an image (content-type: {0})")]
    NotAnImage(String),

    /// The fetched image body exceeded the configured size cap.
    #[error("image exceeds configured maximum size")]
    TooLarge,

    /// The image body could not be decoded into a raster.
    #[error("image decode failed: {0}")]
    DecodeFailed(String),

    /// A CPU inference stage (detector, classifier, embedder) failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// An inference stage did not complete within its configured timeout.
    #[error("inference timed out after {0:?}")]
    InferenceTimeout(std::time::Duration),

    /// The complaint document referenced by a cid does not exist or is not
    /// claimable.
    #[error("complaint not claimable: {0}")]
    NotClaimable(String),

    /// A configuration value was missing or failed to parse.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not need a dedicated variant.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this failure is worth a bounded reattempt via the retry
    /// reconciler, as opposed to a permanent input error that will fail the
    /// same way every time. The reconciler does not consult this today (it
    /// retries everything up to the cap regardless), but the distinction is
    /// kept on the type for callers that want to short-circuit retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::StoreConnect(_) | Error::FetchFailed(_)
        )
    }
}
