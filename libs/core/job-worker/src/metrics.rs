//! Prometheus metrics for the job processor
//!
//! Provides observability into queue pressure and job outcomes.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another recorder
/// is already installed the failure is logged and metrics are not rendered.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .inspect(|_| info!("Prometheus metrics initialized"))
            .inspect_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
    });
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Job processor metrics helper
#[derive(Clone, Copy, Default)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_enqueued(&self, job_type: &str) {
        counter!("job_worker_jobs_enqueued_total", "job_type" => job_type.to_string()).increment(1);
    }

    /// Queue was full and the job was not offered
    pub fn job_dropped(&self, job_type: &str) {
        counter!("job_worker_jobs_dropped_total", "job_type" => job_type.to_string()).increment(1);
    }

    pub fn job_completed(&self, job_type: &str, duration: Duration) {
        counter!(
            "job_worker_jobs_processed_total",
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .increment(1);

        histogram!(
            "job_worker_job_duration_seconds",
            "job_type" => job_type.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, job_type: &str, category: &str) {
        counter!(
            "job_worker_jobs_processed_total",
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "job_worker_job_errors_total",
            "job_type" => job_type.to_string(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn job_retried(&self, job_type: &str) {
        counter!("job_worker_jobs_retried_total", "job_type" => job_type.to_string()).increment(1);
    }

    pub fn jobs_recovered(&self, count: u64) {
        counter!("job_worker_jobs_recovered_total").increment(count);
    }

    pub fn active_workers(&self, count: usize) {
        gauge!("job_worker_active_workers").set(count as f64);
    }
}
