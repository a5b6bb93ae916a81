//! Recording interface over the Prometheus statics.
//!
//! `MetricsCollector` keeps label values consistent across call sites.
//! Every method is a no-op until [`init_metrics`](super::init_metrics) runs.

use super::prometheus::{
    ACTIVE_WORKERS, DEGRADATIONS_TOTAL, PROVIDER_CALLS_TOTAL, PROVIDER_TOKENS_TOTAL, QUEUE_DEPTH,
    RECONCILED_TOTAL, REVIEWS_TOTAL, REVIEW_DURATION, TASK_OUTCOMES_TOTAL,
};

/// Metrics collector for review-forge operations.
///
/// ```ignore
/// use review_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let metrics = MetricsCollector::new();
/// metrics.record_review("fallback", 12.5);
/// metrics.record_task_outcome("requeued");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records a finished orchestration.
    ///
    /// # Arguments
    ///
    /// * `outcome` - `primary`, `fallback` or `failed`
    /// * `duration_secs` - Wall time of the whole review
    pub fn record_review(&self, outcome: &str, duration_secs: f64) {
        if let Some(reviews) = REVIEWS_TOTAL.get() {
            reviews.with_label_values(&[outcome]).inc();
        }
        if let Some(duration) = REVIEW_DURATION.get() {
            duration.observe(duration_secs);
        }
        tracing::trace!(outcome, duration_secs, "Recorded review metric");
    }

    /// Records one provider call and its token usage.
    pub fn record_provider_call(
        &self,
        provider: &str,
        status: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        if let Some(calls) = PROVIDER_CALLS_TOTAL.get() {
            calls.with_label_values(&[provider, status]).inc();
        }
        if let Some(tokens) = PROVIDER_TOKENS_TOTAL.get() {
            if prompt_tokens > 0 {
                tokens
                    .with_label_values(&[provider, "prompt"])
                    .inc_by(prompt_tokens as f64);
            }
            if completion_tokens > 0 {
                tokens
                    .with_label_values(&[provider, "completion"])
                    .inc_by(completion_tokens as f64);
            }
        }
    }

    pub fn record_degradation(&self, kind: &str) {
        if let Some(degradations) = DEGRADATIONS_TOTAL.get() {
            degradations.with_label_values(&[kind]).inc();
        }
    }

    /// Records what happened to a task after an attempt.
    pub fn record_task_outcome(&self, outcome: &str) {
        if let Some(outcomes) = TASK_OUTCOMES_TOTAL.get() {
            outcomes.with_label_values(&[outcome]).inc();
        }
    }

    pub fn set_queue_depth(&self, depth: u64) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }

    pub fn worker_started(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.inc();
        }
    }

    pub fn worker_finished(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.dec();
        }
    }

    /// Records tasks repaired by one reconciliation sweep.
    pub fn record_reconcile(&self, action: &str, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(reconciled) = RECONCILED_TOTAL.get() {
            reconciled
                .with_label_values(&[action])
                .inc_by(count as f64);
        }
    }
}
