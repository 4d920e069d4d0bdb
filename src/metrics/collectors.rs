//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_FINISHED, JOBS_IN_PROGRESS, JOBS_SUBMITTED, JOB_DURATION, QUEUE_DEPTH,
    SAVER_MESSAGES, STORE_WRITE_FAILURES,
};

/// How the saver disposed of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaverOutcome {
    /// Written to the store.
    Persisted,
    /// Could not be decoded and was dropped.
    Undecodable,
    /// The store write failed and the message was dropped.
    WriteFailed,
}

impl SaverOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaverOutcome::Persisted => "persisted",
            SaverOutcome::Undecodable => "undecodable",
            SaverOutcome::WriteFailed => "write_failed",
        }
    }
}

/// Metrics collector for recording trainforge operational metrics.
///
/// # Example
///
/// ```ignore
/// use trainforge::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_job_finished("COMPLETED", Duration::from_secs(20));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a job accepted by the submission path.
    pub fn record_job_submitted(&self) {
        if let Some(jobs_submitted) = JOBS_SUBMITTED.get() {
            jobs_submitted.inc();
        }
    }

    /// Record a job reaching a terminal state.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal status label (e.g. "COMPLETED", "CANCELLED")
    /// * `duration` - Time from execution start to the terminal state
    pub fn record_job_finished(&self, status: &str, duration: Duration) {
        if let Some(jobs_finished) = JOBS_FINISHED.get() {
            jobs_finished.with_label_values(&[status]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[status])
                .observe(duration.as_secs_f64());
        }

        tracing::trace!(
            status = status,
            duration_secs = duration.as_secs_f64(),
            "Recorded job metric"
        );
    }

    /// Record one message handled by the saver.
    pub fn record_saver_message(&self, channel: &str, outcome: SaverOutcome) {
        if let Some(saver_messages) = SAVER_MESSAGES.get() {
            saver_messages
                .with_label_values(&[channel, outcome.as_str()])
                .inc();
        }

        if outcome == SaverOutcome::WriteFailed {
            if let Some(failures) = STORE_WRITE_FAILURES.get() {
                failures.inc();
            }
        }
    }

    /// Update the queue depth for a specific queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Update the count of active workers.
    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}
