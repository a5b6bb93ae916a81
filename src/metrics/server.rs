//! HTTP endpoint exposing the process registry to Prometheus scrapers.
//!
//! The worker process owns the counters, so it is also the process that
//! serves them. Routes:
//!
//! - `GET /metrics`: text exposition of [`REGISTRY`](super::REGISTRY)
//! - `GET /health`: liveness check

use std::future::Future;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::prometheus::export_metrics;

/// Content type of the Prometheus text format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
}

async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], export_metrics())
}

/// Serves [`metrics_router`] on `listener` until `shutdown` resolves.
pub async fn serve_metrics<F>(listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Serving metrics");
    }
    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(shutdown)
        .await
}
