//! Job definitions for the orchestrator.
//!
//! This module defines the data model shared by every role:
//!
//! - `JobInitRecord`: the immutable part of a job, written once at submission
//! - `ProgressEntry` / `ResultEntry`: append-only history entries
//! - `JobState`: the lifecycle state derived from that history
//! - `JobView`: the merged snapshot returned to readers

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key-value payload passed verbatim to the worker.
pub type JobConfig = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a job.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. Terminal states
/// accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Returns whether no further transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Returns whether moving from `self` to `next` follows the state machine.
    ///
    /// Staying in `Running` is legal (every progress message re-asserts it);
    /// a job may also go straight from `Pending` to a terminal state when it
    /// is cancelled or fails before its first progress report.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Pending) => false,
            (JobState::Pending, _) => true,
            (JobState::Running, JobState::Pending) => false,
            (JobState::Running, _) => true,
            _ => false,
        }
    }

    /// State implied by the last entries of a job's progress and result logs.
    pub fn derive(
        last_progress: Option<&ProgressEntry>,
        last_result: Option<&ResultEntry>,
    ) -> JobState {
        match (last_progress, last_result) {
            (_, Some(result)) => JobState::from(result.status),
            (Some(_), None) => JobState::Running,
            (None, None) => JobState::Pending,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Status carried by a terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<TerminalStatus> for JobState {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => JobState::Completed,
            TerminalStatus::Failed => JobState::Failed,
            TerminalStatus::Cancelled => JobState::Cancelled,
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        JobState::from(*self).fmt(f)
    }
}

/// The job fields known at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInitRecord {
    /// Unique job identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Display label.
    pub name: String,
    /// Opaque worker configuration.
    #[serde(default)]
    pub config: JobConfig,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

/// One entry of a job's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Percent complete, 0-100.
    pub progress: u8,
    /// Wall-clock time since execution start.
    pub elapsed_ms: u64,
    /// When the worker emitted the entry.
    pub timestamp: DateTime<Utc>,
}

/// Reference to an artifact produced by a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// File name inside the job's artifact directory.
    pub name: String,
    /// Path relative to the work directory.
    pub path: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
}

/// One entry of a job's result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Terminal status reported by the worker.
    pub status: TerminalStatus,
    /// When the worker finished.
    pub timestamp: DateTime<Utc>,
    /// Artifacts written by the worker.
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRef>,
    /// Error summary for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution time when the result was produced.
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Worker that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// Merged read model: init record plus latest progress and result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
    pub progress: u8,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ResultEntry>,
}

impl JobView {
    /// Merges an init record with the last entries of its two logs.
    ///
    /// Each log is taken independently; no cross-log ordering is assumed.
    pub fn merge(
        init: JobInitRecord,
        last_progress: Option<ProgressEntry>,
        last_result: Option<ResultEntry>,
    ) -> Self {
        let state = JobState::derive(last_progress.as_ref(), last_result.as_ref());

        let progress = last_progress.as_ref().map(|p| p.progress).unwrap_or(0);
        let elapsed_ms = match (&last_progress, &last_result) {
            (_, Some(result)) if result.elapsed_ms > 0 => result.elapsed_ms,
            (Some(p), _) => p.elapsed_ms,
            _ => 0,
        };

        Self {
            id: init.id,
            project_id: init.project_id,
            name: init.name,
            config: init.config,
            created_at: init.created_at,
            state,
            progress,
            elapsed_ms,
            last_result,
        }
    }
}

/// Ordering of `list` results by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// A job submission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Owning project.
    pub project_id: String,
    /// Optional display label.
    #[serde(default)]
    pub name: Option<String>,
    /// Worker configuration.
    #[serde(default)]
    pub config: JobConfig,
}

impl SubmitRequest {
    /// Creates a request with an empty config and a generated name.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: None,
            config: JobConfig::new(),
        }
    }

    /// Sets the display label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the worker configuration.
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }
}

/// Generates a fresh job identifier.
pub fn new_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}

/// Name used when a submission does not carry one.
pub fn default_job_name(project_id: &str) -> String {
    format!("experiment-{}", project_id)
}
