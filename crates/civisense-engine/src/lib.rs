//! CiviSense Engine
//!
//! The runtime loop that turns the trait seams in `civisense-core` into a
//! running pipeline: a deduplicated processing queue, the per-complaint AI
//! processor, a change-stream listener, and a periodic retry reconciler.
//! Nothing here talks to MongoDB or `ort` directly -- every adapter is
//! injected as a trait object, so `civisense-service` is the only place
//! that wires concrete `civisense-store`/`civisense-vision` types in.

mod change_stream;
mod processor;
mod queue;
mod reconciler;

pub use change_stream::ChangeStreamListener;
pub use processor::AiProcessor;
pub use queue::ProcessingQueue;
pub use reconciler::RetryReconciler;
