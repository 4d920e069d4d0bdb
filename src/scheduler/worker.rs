//! Execution of a single job.
//!
//! A `Worker` takes one dispatched job from start to a terminal result:
//! it runs the trainer's units in order, reports progress after each unit,
//! polls the cancellation marker on a fixed cadence, and publishes exactly
//! one result message.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::metrics::MetricsCollector;
use crate::store::{ArtifactStore, CancelMarkers};

use super::bus::MessageBus;
use super::job::ArtifactRef;
use super::messages::{DispatchPayload, ProgressMsg, QueueMessage, ResultMsg};
use super::trainer::{Trainer, TrainingJob};

/// Percent complete after `done` of `total` units, rounded down.
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    ((u64::from(done.min(total)) * 100) / u64::from(total)) as u8
}

/// Executes dispatched jobs one at a time.
pub struct Worker {
    id: String,
    bus: MessageBus,
    trainer: Arc<dyn Trainer>,
    artifacts: ArtifactStore,
    cancellations: CancelMarkers,
    cancel_check_every: u32,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        bus: MessageBus,
        trainer: Arc<dyn Trainer>,
        artifacts: ArtifactStore,
        cancellations: CancelMarkers,
    ) -> Self {
        Self {
            id: id.into(),
            bus,
            trainer,
            artifacts,
            cancellations,
            cancel_check_every: 1,
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets how many units run between cancellation checks (minimum 1).
    pub fn with_cancel_check_every(mut self, every: u32) -> Self {
        self.cancel_check_every = every.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Runs `payload` to a terminal state and returns the result that was
    /// published.
    pub async fn execute(&self, payload: &DispatchPayload) -> ResultMsg {
        let started = Instant::now();
        let job = TrainingJob {
            project_id: payload.pid.clone(),
            job_id: payload.jid.clone(),
            config: payload.config.clone(),
        };

        info!(
            worker_id = %self.id,
            project_id = %job.project_id,
            job_id = %job.job_id,
            "Starting job"
        );

        self.metrics.inc_jobs_in_progress();
        let result = self.run(&job, started).await;
        self.metrics.dec_jobs_in_progress();

        self.metrics
            .record_job_finished(&result.status.to_string(), started.elapsed());
        self.publish(QueueMessage::Result(result.clone())).await;

        info!(
            worker_id = %self.id,
            job_id = %job.job_id,
            status = %result.status,
            progress = result.progress,
            elapsed_ms = result.elapsed_ms,
            "Job finished"
        );

        result
    }

    async fn run(&self, job: &TrainingJob, started: Instant) -> ResultMsg {
        let pid = job.project_id.as_str();
        let jid = job.job_id.as_str();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let units = match self.trainer.plan(&job.config) {
            Ok(units) => units,
            Err(e) => {
                warn!(worker_id = %self.id, job_id = jid, error = %e, "Rejected job config");
                return ResultMsg::failed(pid, jid, &self.id, e.to_string(), 0, elapsed_ms());
            }
        };

        let mut progress = 0u8;
        for unit in 0..units {
            if unit % self.cancel_check_every == 0 && self.is_cancelled(jid).await {
                info!(worker_id = %self.id, job_id = jid, unit, "Cancellation observed");
                return ResultMsg::cancelled(pid, jid, &self.id, progress, elapsed_ms());
            }

            if let Err(e) = self.trainer.run_unit(job, unit).await {
                error!(worker_id = %self.id, job_id = jid, unit, error = %e, "Unit of work failed");
                return ResultMsg::failed(pid, jid, &self.id, e.to_string(), progress, elapsed_ms());
            }

            progress = progress_percent(unit + 1, units);
            self.publish(QueueMessage::Progress(ProgressMsg::new(
                pid,
                jid,
                progress,
                elapsed_ms(),
            )))
            .await;
        }

        if units == 0 {
            progress = 100;
            self.publish(QueueMessage::Progress(ProgressMsg::new(
                pid,
                jid,
                progress,
                elapsed_ms(),
            )))
            .await;
        }

        if self.is_cancelled(jid).await {
            info!(worker_id = %self.id, job_id = jid, "Cancellation observed after last unit");
            return ResultMsg::cancelled(pid, jid, &self.id, progress, elapsed_ms());
        }

        match self.store_artifacts(job).await {
            Ok(refs) => ResultMsg::completed(pid, jid, &self.id, refs, elapsed_ms()),
            Err(reason) => {
                error!(worker_id = %self.id, job_id = jid, error = %reason, "Failed to produce artifacts");
                ResultMsg::failed(pid, jid, &self.id, reason, progress, elapsed_ms())
            }
        }
    }

    async fn store_artifacts(&self, job: &TrainingJob) -> Result<Vec<ArtifactRef>, String> {
        let outputs = self
            .trainer
            .artifacts(job)
            .await
            .map_err(|e| e.to_string())?;

        let mut refs = Vec::with_capacity(outputs.len());
        for output in outputs {
            let artifact = self
                .artifacts
                .store(&job.project_id, &job.job_id, &output.name, &output.data)
                .await
                .map_err(|e| format!("Artifact error: {}", e))?;
            refs.push(artifact);
        }
        Ok(refs)
    }

    /// A marker that cannot be read counts as not set.
    async fn is_cancelled(&self, job_id: &str) -> bool {
        match self.cancellations.is_set(job_id).await {
            Ok(set) => set,
            Err(e) => {
                warn!(worker_id = %self.id, job_id, error = %e, "Failed to check cancellation marker");
                false
            }
        }
    }

    async fn publish(&self, message: QueueMessage) {
        if let Err(e) = self.bus.publish(&message).await {
            error!(
                worker_id = %self.id,
                job_id = message.jid(),
                channel = %message.channel(),
                error = %e,
                "Failed to publish message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelNames;
    use crate::error::TrainingError;
    use crate::scheduler::bus::Delivery;
    use crate::scheduler::job::{JobConfig, TerminalStatus};
    use crate::scheduler::queue::MemoryTaskQueue;
    use crate::scheduler::trainer::{ArtifactOutput, SimulatedTrainer};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FailingTrainer {
        fail_at: u32,
    }

    #[async_trait]
    impl Trainer for FailingTrainer {
        fn plan(&self, _config: &JobConfig) -> Result<u32, TrainingError> {
            Ok(4)
        }

        async fn run_unit(&self, _job: &TrainingJob, unit: u32) -> Result<(), TrainingError> {
            if unit == self.fail_at {
                return Err(TrainingError::UnitFailed {
                    unit,
                    reason: "loss diverged".to_string(),
                });
            }
            Ok(())
        }

        async fn artifacts(
            &self,
            _job: &TrainingJob,
        ) -> Result<Vec<ArtifactOutput>, TrainingError> {
            Ok(Vec::new())
        }
    }

    /// Sets the job's cancellation marker while running one unit.
    struct CancellingTrainer {
        markers: CancelMarkers,
        cancel_during: u32,
        ran: std::sync::Mutex<Vec<u32>>,
    }

    impl CancellingTrainer {
        fn new(temp_dir: &TempDir, cancel_during: u32) -> Self {
            Self {
                markers: CancelMarkers::new(temp_dir.path()),
                cancel_during,
                ran: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<u32> {
            self.ran.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Trainer for CancellingTrainer {
        fn plan(&self, _config: &JobConfig) -> Result<u32, TrainingError> {
            Ok(10)
        }

        async fn run_unit(&self, job: &TrainingJob, unit: u32) -> Result<(), TrainingError> {
            self.ran.lock().expect("lock").push(unit);
            if unit == self.cancel_during {
                self.markers
                    .set(&job.job_id)
                    .await
                    .map_err(|e| TrainingError::UnitFailed {
                        unit,
                        reason: e.to_string(),
                    })?;
            }
            Ok(())
        }

        async fn artifacts(
            &self,
            _job: &TrainingJob,
        ) -> Result<Vec<ArtifactOutput>, TrainingError> {
            Ok(Vec::new())
        }
    }

    fn worker(temp_dir: &TempDir, trainer: Arc<dyn Trainer>) -> (MessageBus, Worker) {
        let bus = MessageBus::new(Arc::new(MemoryTaskQueue::new()), ChannelNames::default());
        let worker = Worker::new(
            "worker-0",
            bus.clone(),
            trainer,
            ArtifactStore::new(temp_dir.path()),
            CancelMarkers::new(temp_dir.path()),
        );
        (bus, worker)
    }

    fn payload(epochs: u32) -> DispatchPayload {
        let mut config = JobConfig::new();
        config.insert("epochs".to_string(), json!(epochs));
        DispatchPayload::new("p1", "job-1", config)
    }

    async fn drain_progress(bus: &MessageBus) -> Vec<u8> {
        let mut values = Vec::new();
        while let Some(delivery) = bus
            .next_message(Duration::from_millis(10))
            .await
            .expect("pop")
        {
            if let Delivery::Message(QueueMessage::Progress(p)) = delivery {
                values.push(p.progress);
            }
        }
        values
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(1, 10), 10);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
        assert_eq!(progress_percent(5, 4), 100);
    }

    #[tokio::test]
    async fn test_completes_with_progress_and_artifacts() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(SimulatedTrainer::new(Duration::ZERO)));

        let result = worker.execute(&payload(4)).await;
        assert_eq!(result.status, TerminalStatus::Completed);
        assert_eq!(result.progress, 100);
        assert_eq!(result.artifact_refs.len(), 1);
        assert_eq!(result.artifact_refs[0].name, "result.txt");
        assert_eq!(result.worker_id.as_deref(), Some("worker-0"));

        assert_eq!(drain_progress(&bus).await, vec![25, 50, 75, 100]);
        assert!(temp_dir
            .path()
            .join("projects/p1/jobs/job-1/artifacts/result.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_cancel_before_first_unit() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(SimulatedTrainer::new(Duration::ZERO)));
        CancelMarkers::new(temp_dir.path())
            .set("job-1")
            .await
            .expect("set marker");

        let result = worker.execute(&payload(10)).await;
        assert_eq!(result.status, TerminalStatus::Cancelled);
        assert_eq!(result.progress, 0);
        assert!(drain_progress(&bus).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_next_scheduled_check() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let trainer = Arc::new(CancellingTrainer::new(&temp_dir, 1));
        let (bus, worker) = worker(&temp_dir, trainer.clone());
        let worker = worker.with_cancel_check_every(3);

        let result = worker.execute(&payload(10)).await;

        // Checks run before units 0, 3, 6 and 9.
        assert_eq!(result.status, TerminalStatus::Cancelled);
        assert_eq!(result.progress, 30);
        assert_eq!(trainer.ran(), vec![0, 1, 2]);
        assert_eq!(drain_progress(&bus).await, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_cancellation_after_last_scheduled_check_wins_over_completion() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let trainer = Arc::new(CancellingTrainer::new(&temp_dir, 9));
        let (_bus, worker) = worker(&temp_dir, trainer.clone());
        let worker = worker.with_cancel_check_every(3);

        let result = worker.execute(&payload(10)).await;

        assert_eq!(result.status, TerminalStatus::Cancelled);
        assert_eq!(result.progress, 100);
        assert_eq!(trainer.ran(), (0..10).collect::<Vec<_>>());
        assert!(result.artifact_refs.is_empty());
        assert!(!temp_dir
            .path()
            .join("projects/p1/jobs/job-1/artifacts")
            .exists());
    }

    #[tokio::test]
    async fn test_failure_reports_error_and_last_progress() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(FailingTrainer { fail_at: 2 }));

        let result = worker.execute(&payload(4)).await;
        assert_eq!(result.status, TerminalStatus::Failed);
        assert_eq!(result.progress, 50);
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("loss diverged")));
        assert_eq!(drain_progress(&bus).await, vec![25, 50]);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_progress() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(SimulatedTrainer::new(Duration::ZERO)));

        let mut config = JobConfig::new();
        config.insert("epochs".to_string(), json!("lots"));
        let result = worker
            .execute(&DispatchPayload::new("p1", "job-1", config))
            .await;

        assert_eq!(result.status, TerminalStatus::Failed);
        assert_eq!(result.progress, 0);
        assert!(drain_progress(&bus).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_units_emits_single_full_progress() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(SimulatedTrainer::new(Duration::ZERO)));

        let result = worker.execute(&payload(0)).await;
        assert_eq!(result.status, TerminalStatus::Completed);
        assert_eq!(drain_progress(&bus).await, vec![100]);
    }

    #[tokio::test]
    async fn test_result_is_published() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (bus, worker) = worker(&temp_dir, Arc::new(SimulatedTrainer::new(Duration::ZERO)));

        let result = worker.execute(&payload(1)).await;

        let mut published = None;
        while let Some(delivery) = bus
            .next_message(Duration::from_millis(10))
            .await
            .expect("pop")
        {
            if let Delivery::Message(QueueMessage::Result(r)) = delivery {
                published = Some(r);
            }
        }
        assert_eq!(published, Some(result));
    }
}
