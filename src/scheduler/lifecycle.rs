//! Job lifecycle API: submit, cancel and read jobs.
//!
//! Submission order is fixed:
//!
//! 1. build the init record and dispatch payload
//! 2. enqueue the payload on the dispatch channel
//! 3. push the init message
//!
//! A failed enqueue leaves no trace and is returned to the caller. If the
//! enqueue succeeds but the init push fails, the job is already queued;
//! the service sets its cancellation marker so the worker stops at its
//! first check, and reports `JobError::InitPublishFailed`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::error::JobError;
use crate::metrics::MetricsCollector;
use crate::store::{validate_id, CancelMarkers, JobStore};

use super::bus::MessageBus;
use super::job::{
    default_job_name, new_job_id, JobInitRecord, JobState, JobView, SortOrder, SubmitRequest,
};
use super::messages::{DispatchPayload, InitMsg, QueueMessage};

/// Entry point for clients of the orchestrator.
///
/// Only `submit` talks to the broker; cancellation and reads go straight to
/// the work directory, so a service built with [`JobService::store_only`]
/// keeps working while the broker is down.
pub struct JobService {
    bus: Option<MessageBus>,
    store: Arc<JobStore>,
    cancellations: CancelMarkers,
    metrics: MetricsCollector,
}

impl JobService {
    pub fn new(bus: MessageBus, store: Arc<JobStore>, cancellations: CancelMarkers) -> Self {
        Self {
            bus: Some(bus),
            store,
            cancellations,
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates a service without a broker connection. `submit` fails with
    /// `JobError::NoBroker`.
    pub fn store_only(store: Arc<JobStore>, cancellations: CancelMarkers) -> Self {
        Self {
            bus: None,
            store,
            cancellations,
            metrics: MetricsCollector::new(),
        }
    }

    /// Submits a job and returns its id.
    ///
    /// The job becomes visible to readers once the saver has persisted its
    /// init message.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, JobError> {
        let bus = self.bus.as_ref().ok_or(JobError::NoBroker)?;
        validate_id(&request.project_id)
            .map_err(|e| JobError::InvalidRequest(e.to_string()))?;

        let job_id = new_job_id();
        let name = match request.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => default_job_name(&request.project_id),
        };

        let record = JobInitRecord {
            id: job_id.clone(),
            project_id: request.project_id.clone(),
            name,
            config: request.config.clone(),
            created_at: Utc::now(),
        };
        let payload = DispatchPayload::new(&request.project_id, &job_id, request.config);

        bus.dispatch(&payload).await.map_err(JobError::Enqueue)?;

        let init = QueueMessage::Init(InitMsg::from_record(&record));
        if let Err(source) = bus.publish(&init).await {
            error!(
                project_id = %record.project_id,
                job_id = %job_id,
                error = %source,
                "Init message lost after enqueue, cancelling job"
            );
            if let Err(e) = self.cancellations.set(&job_id).await {
                error!(job_id = %job_id, error = %e, "Failed to set cancellation marker");
            }
            return Err(JobError::InitPublishFailed { job_id, source });
        }

        self.metrics.record_job_submitted();
        info!(
            project_id = %record.project_id,
            job_id = %job_id,
            name = %record.name,
            "Job submitted"
        );

        Ok(job_id)
    }

    /// Requests cancellation of a job. Idempotent.
    ///
    /// The worker observes the request at its next check; this call does
    /// not wait for it.
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        self.cancellations.set(job_id).await?;
        Ok(())
    }

    /// Returns the merged view of one job.
    pub async fn get(&self, project_id: &str, job_id: &str) -> Result<JobView, JobError> {
        Ok(self.store.read_job(project_id, job_id).await?)
    }

    /// Lists a project's jobs.
    pub async fn list(
        &self,
        project_id: &str,
        state: Option<JobState>,
        order: SortOrder,
    ) -> Result<Vec<JobView>, JobError> {
        Ok(self.store.list_jobs(project_id, state, order).await?)
    }

    /// Returns a job's event log.
    pub async fn logs(&self, project_id: &str, job_id: &str) -> Result<String, JobError> {
        Ok(self.store.read_log(project_id, job_id).await?)
    }
}
