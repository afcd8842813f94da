//! Monitoring HTTP surface (C15): `GET /health`, `GET /stats`, and
//! `GET /pending-count`, the only externally-visible surface this service
//! exposes. Grounded on the observability crate's axum router/listener
//! pattern -- a `Router` built once, handed to `axum::serve` over a bound
//! `TcpListener`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use civisense_core::traits::DocumentStore;
use civisense_core::RuntimeStats;
use civisense_engine::ProcessingQueue;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared state handed to every monitoring-surface handler.
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<RuntimeStats>,
    pub queue: Arc<ProcessingQueue>,
    pub store: Arc<dyn DocumentStore>,
}

/// Binds `addr` and returns the bound address plus a future that serves the
/// monitoring surface until the process exits.
pub async fn serve(
    addr: &str,
    state: AppState,
) -> anyhow::Result<(std::net::SocketAddr, impl std::future::Future<Output = anyhow::Result<()>>)> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/pending-count", get(pending_count_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "monitoring surface listening");

    let server_future = async move {
        axum::serve(listener, app).await?;
        Ok(())
    };

    Ok((local_addr, server_future))
}

/// `status` reports `"degraded"` for an expected standalone-deployment or
/// reconnecting-stream state, not a failure of the degradation contract.
async fn health_handler(State(state): State<AppState>) -> Response {
    let queue_size = state.queue.len().await;
    let replica_set_enabled = state.stats.replica_set_enabled();
    let change_stream_running = state.stats.change_stream_running();
    let pending_count = match state.store.count_pending().await {
        Ok(count) => Some(count),
        Err(err) => {
            tracing::warn!(error = %err, "failed to count pending complaints for health check");
            None
        }
    };

    let status = if replica_set_enabled && change_stream_running {
        "ok"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "replicaSetEnabled": replica_set_enabled,
        "changeStreamRunning": change_stream_running,
        "queueSize": queue_size,
        "pendingCount": pending_count,
    }))
    .into_response()
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    let queue_size = state.queue.len().await;
    Json(state.stats.snapshot(queue_size)).into_response()
}

async fn pending_count_handler(State(state): State<AppState>) -> Response {
    match state.store.count_pending().await {
        Ok(count) => Json(serde_json::json!({ "pendingCount": count })).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to count pending complaints");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
