//! trainforge: training job orchestration over a Redis task queue.
//!
//! Jobs are submitted through [`scheduler::JobService`], executed by a
//! [`scheduler::WorkerPool`] and tracked by a single [`scheduler::Saver`]
//! that persists every init, progress and result message into the
//! file-based [`store::JobStore`].

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, OrchestratorConfig};
pub use error::{JobError, StoreError, TrainingError};
