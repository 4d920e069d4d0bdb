//! Metrics module for Prometheus-based monitoring.
//!
//! Covers job submission and completion, saver throughput and worker
//! activity.
//!
//! # Example
//!
//! ```ignore
//! use trainforge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_job_submitted();
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, SaverOutcome};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_FINISHED, JOBS_IN_PROGRESS, JOBS_SUBMITTED, JOB_DURATION, QUEUE_DEPTH,
    REGISTRY, SAVER_MESSAGES, STORE_WRITE_FAILURES,
};
