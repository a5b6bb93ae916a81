//! Prometheus metrics registration and export.
//!
//! All metrics live in process-wide statics filled once by [`init_metrics`].
//! Recording before initialization is a no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all review-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Reviews finished by the orchestrator, labeled by outcome
/// (`primary`, `fallback`, `failed`).
pub static REVIEWS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Orchestrated review duration in seconds.
pub static REVIEW_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Provider calls, labeled by provider id and status (`success`, `failed`, `error`).
pub static PROVIDER_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tokens consumed, labeled by provider id and type (`prompt`/`completion`).
pub static PROVIDER_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Degradation events, labeled by kind (`primary_failed`, `fallback_skipped`, `fallback_failed`).
pub static DEGRADATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task attempt outcomes, labeled by outcome
/// (`completed`, `requeued`, `exhausted`, `permanent`).
pub static TASK_OUTCOMES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Entries in the task queue at the last poll.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Workers currently processing a task.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Tasks repaired by reconciliation, labeled by action
/// (`requeued_pending`, `recovered_running`).
pub static RECONCILED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let reviews_total = CounterVec::new(
        Opts::new("review_forge_reviews_total", "Reviews finished by outcome"),
        &["outcome"],
    )?;

    let review_duration = Histogram::with_opts(
        HistogramOpts::new(
            "review_forge_review_duration_seconds",
            "Orchestrated review duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )?;

    let provider_calls_total = CounterVec::new(
        Opts::new("review_forge_provider_calls_total", "AI provider calls"),
        &["provider", "status"],
    )?;

    let provider_tokens_total = CounterVec::new(
        Opts::new("review_forge_provider_tokens_total", "Tokens consumed by provider"),
        &["provider", "type"],
    )?;

    let degradations_total = CounterVec::new(
        Opts::new("review_forge_degradations_total", "Provider degradation events"),
        &["kind"],
    )?;

    let task_outcomes_total = CounterVec::new(
        Opts::new("review_forge_task_outcomes_total", "Task attempt outcomes"),
        &["outcome"],
    )?;

    let queue_depth = Gauge::new("review_forge_queue_depth", "Entries in the task queue")?;

    let active_workers = Gauge::new(
        "review_forge_active_workers",
        "Workers currently processing a task",
    )?;

    let reconciled_total = CounterVec::new(
        Opts::new("review_forge_reconciled_total", "Tasks repaired by reconciliation"),
        &["action"],
    )?;

    registry.register(Box::new(reviews_total.clone()))?;
    registry.register(Box::new(review_duration.clone()))?;
    registry.register(Box::new(provider_calls_total.clone()))?;
    registry.register(Box::new(provider_tokens_total.clone()))?;
    registry.register(Box::new(degradations_total.clone()))?;
    registry.register(Box::new(task_outcomes_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(reconciled_total.clone()))?;

    // A concurrent initializer may have won; its metrics stay in place.
    let _ = REGISTRY.set(registry);
    let _ = REVIEWS_TOTAL.set(reviews_total);
    let _ = REVIEW_DURATION.set(review_duration);
    let _ = PROVIDER_CALLS_TOTAL.set(provider_calls_total);
    let _ = PROVIDER_TOKENS_TOTAL.set(provider_tokens_total);
    let _ = DEGRADATIONS_TOTAL.set(degradations_total);
    let _ = TASK_OUTCOMES_TOTAL.set(task_outcomes_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = RECONCILED_TOTAL.set(reconciled_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead if metrics are not initialized or cannot
/// be encoded.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init_has_prefix() {
        init_metrics().expect("init");
        if let Some(counter) = TASK_OUTCOMES_TOTAL.get() {
            counter.with_label_values(&["completed"]).inc();
        }

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("review_forge_task_outcomes_total"));
    }
}
