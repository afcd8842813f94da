//! CiviSense Service entrypoint: loads configuration, connects to MongoDB,
//! loads the ONNX models, and wires the queue/processor/change-stream
//! listener/retry reconciler/monitoring surface into a single process with
//! coordinated graceful shutdown.

mod http;

use std::sync::Arc;

use civisense_core::traits::DocumentStore;
use civisense_core::{RuntimeStats, Settings};
use civisense_engine::{AiProcessor, ChangeStreamListener, ProcessingQueue, RetryReconciler};
use civisense_store::MongoBackend;
use civisense_vision::{OrtClassifier, OrtDetector, OrtEmbedder, ReqwestImageFetcher};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env()?;
    tracing::info!("starting civisense service");

    let backend = MongoBackend::connect(&settings).await?;
    tracing::info!(replica_set = backend.replica_set_enabled, "connected to document store");

    let detector = OrtDetector::load(
        &settings.yolo_model_path,
        &settings.yolo_labels_path,
        settings.yolo_image_size,
        settings.yolo_max_image_dimension,
        settings.yolo_confidence_threshold,
    )?;
    let classifier = OrtClassifier::load(
        &settings.mobilenet_model_path,
        &settings.mobilenet_labels_path,
        settings.yolo_max_image_dimension,
    )?;
    let embedder = OrtEmbedder::load(&settings.mobilenet_model_path, settings.yolo_max_image_dimension)?;
    let image_fetcher = ReqwestImageFetcher::new(settings.image_download_timeout(), settings.image_max_bytes)?;
    tracing::info!("vision models loaded");

    let store: Arc<dyn DocumentStore> = Arc::new(backend.document_store);
    let geo_lookup = Arc::new(backend.sensitive_locations);
    let cluster_counter = Arc::new(backend.nearby_complaints);

    let stats = Arc::new(RuntimeStats::new());
    stats.set_replica_set_enabled(backend.replica_set_enabled);

    let processor = AiProcessor::new(
        Arc::clone(&store),
        geo_lookup,
        cluster_counter,
        Arc::new(image_fetcher),
        Arc::new(detector),
        Arc::new(classifier),
        Arc::new(embedder),
        settings.clone(),
        Arc::clone(&stats),
    );
    let queue = Arc::new(ProcessingQueue::new(Arc::clone(&stats)));
    let change_stream = ChangeStreamListener::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&stats));
    let reconciler = RetryReconciler::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&stats), settings.clone());

    let (stopping_tx, _) = broadcast::channel::<()>(1);

    let monitoring_state = http::AppState {
        stats: Arc::clone(&stats),
        queue: Arc::clone(&queue),
        store: Arc::clone(&store),
    };
    let (monitoring_addr, monitoring_future) = http::serve(&settings.monitoring_bind_addr, monitoring_state).await?;
    tracing::info!(%monitoring_addr, "monitoring surface ready");

    let shutdown_tx = stopping_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping workers");
        let _ = shutdown_tx.send(());
    });

    let queue_worker = {
        let queue = Arc::clone(&queue);
        let stopping = stopping_tx.subscribe();
        tokio::spawn(async move { queue.run(&processor, stopping).await })
    };
    let change_stream_worker = {
        let stopping = stopping_tx.subscribe();
        tokio::spawn(async move { change_stream.run(stopping).await })
    };
    let reconciler_worker = {
        let stopping = stopping_tx.subscribe();
        tokio::spawn(async move { reconciler.run(stopping).await })
    };
    let monitoring_worker = tokio::spawn(monitoring_future);

    let _ = tokio::join!(queue_worker, change_stream_worker, reconciler_worker);
    monitoring_worker.abort();

    tracing::info!("civisense service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
