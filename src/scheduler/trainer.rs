//! The unit of work executed by a worker.
//!
//! Training itself is opaque to the orchestrator: a `Trainer` only has to
//! split a job into a number of bounded units, run them one at a time, and
//! hand back whatever artifacts it produced.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TrainingError;

use super::job::JobConfig;

/// Default number of units when the config does not specify `epochs`.
pub const DEFAULT_EPOCHS: u32 = 10;

/// Identity and configuration of the job being executed.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub project_id: String,
    pub job_id: String,
    pub config: JobConfig,
}

/// A named blob produced by a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutput {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArtifactOutput {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// An executable training procedure.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Returns how many units of work `config` requires.
    fn plan(&self, config: &JobConfig) -> Result<u32, TrainingError>;

    /// Runs unit `unit` (zero-based) of `job`.
    async fn run_unit(&self, job: &TrainingJob, unit: u32) -> Result<(), TrainingError>;

    /// Produces the artifacts of a job whose units all succeeded.
    async fn artifacts(&self, job: &TrainingJob) -> Result<Vec<ArtifactOutput>, TrainingError>;
}

/// Reads `epochs` from a job config, defaulting to [`DEFAULT_EPOCHS`].
pub fn epochs_from_config(config: &JobConfig) -> Result<u32, TrainingError> {
    match config.get("epochs") {
        None | Some(Value::Null) => Ok(DEFAULT_EPOCHS),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                TrainingError::InvalidConfig(format!(
                    "epochs must be a non-negative integer, got {}",
                    n
                ))
            }),
        Some(Value::String(s)) => s.trim().parse::<u32>().map_err(|_| {
            TrainingError::InvalidConfig(format!(
                "epochs must be a non-negative integer, got '{}'",
                s
            ))
        }),
        Some(other) => Err(TrainingError::InvalidConfig(format!(
            "epochs must be a non-negative integer, got {}",
            other
        ))),
    }
}

/// Stand-in trainer that sleeps for each epoch and writes a fixed result file.
#[derive(Debug, Clone)]
pub struct SimulatedTrainer {
    unit_delay: Duration,
}

impl SimulatedTrainer {
    pub fn new(unit_delay: Duration) -> Self {
        Self { unit_delay }
    }
}

impl Default for SimulatedTrainer {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

#[async_trait]
impl Trainer for SimulatedTrainer {
    fn plan(&self, config: &JobConfig) -> Result<u32, TrainingError> {
        epochs_from_config(config)
    }

    async fn run_unit(&self, job: &TrainingJob, unit: u32) -> Result<(), TrainingError> {
        tracing::debug!(job_id = %job.job_id, epoch = unit + 1, "Simulating epoch");
        if !self.unit_delay.is_zero() {
            tokio::time::sleep(self.unit_delay).await;
        }
        Ok(())
    }

    async fn artifacts(&self, _job: &TrainingJob) -> Result<Vec<ArtifactOutput>, TrainingError> {
        Ok(vec![ArtifactOutput::new("result.txt", "training complete")])
    }
}
