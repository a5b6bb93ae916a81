//! Prometheus metrics for reviews, providers, tasks and the queue.
//!
//! The worker serves the registry over HTTP (see [`server`]); the `metrics`
//! command scrapes that endpoint.
//!
//! ```ignore
//! use review_forge::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_task_outcome("completed");
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;
pub mod server;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};
pub use server::{metrics_router, serve_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, DEGRADATIONS_TOTAL, PROVIDER_CALLS_TOTAL, PROVIDER_TOKENS_TOTAL, QUEUE_DEPTH,
    RECONCILED_TOTAL, REGISTRY, REVIEWS_TOTAL, REVIEW_DURATION, TASK_OUTCOMES_TOTAL,
};
