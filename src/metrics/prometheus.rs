//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by trainforge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all trainforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of jobs accepted by the submission path.
pub static JOBS_SUBMITTED: OnceLock<IntCounter> = OnceLock::new();

/// Total number of jobs that reached a terminal state, labeled by status.
pub static JOBS_FINISHED: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by status.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of work items waiting for a worker, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Messages handled by the saver, labeled by channel and outcome.
pub static SAVER_MESSAGES: OnceLock<CounterVec> = OnceLock::new();

/// Store writes that failed and whose message was dropped.
pub static STORE_WRITE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Number of jobs currently being executed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Later calls
/// succeed but keep the metrics created by the first call.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_submitted = IntCounter::new(
        "trainforge_jobs_submitted_total",
        "Total number of jobs submitted",
    )?;

    let jobs_finished = CounterVec::new(
        Opts::new(
            "trainforge_jobs_finished_total",
            "Total number of jobs that reached a terminal state",
        ),
        &["status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "trainforge_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
        &["status"],
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("trainforge_queue_depth", "Number of work items waiting"),
        &["queue_name"],
    )?;

    // Saver metrics
    let saver_messages = CounterVec::new(
        Opts::new(
            "trainforge_saver_messages_total",
            "Messages handled by the saver",
        ),
        &["channel", "outcome"],
    )?;

    let store_write_failures = Counter::new(
        "trainforge_store_write_failures_total",
        "Store writes that failed and whose message was dropped",
    )?;

    // Worker metrics
    let jobs_in_progress = Gauge::new(
        "trainforge_jobs_in_progress",
        "Number of jobs currently being executed",
    )?;

    let active_workers = Gauge::new("trainforge_active_workers", "Number of active workers")?;

    registry.register(Box::new(jobs_submitted.clone()))?;
    registry.register(Box::new(jobs_finished.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(saver_messages.clone()))?;
    registry.register(Box::new(store_write_failures.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED.set(jobs_submitted);
    let _ = JOBS_FINISHED.set(jobs_finished);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = SAVER_MESSAGES.set(saver_messages);
    let _ = STORE_WRITE_FAILURES.set(store_write_failures);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
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
