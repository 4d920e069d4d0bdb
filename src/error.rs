//! Error types for trainforge operations.
//!
//! Subsystems that sit on an external boundary keep their own error type next
//! to the code (`QueueError`, `PoolError`, `ConfigError`). The types here are
//! shared across the store, the lifecycle API and training units.

use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::queue::QueueError;

/// Errors that can occur during Job Store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job '{job_id}' not found in project '{project_id}'")]
    NotFound { project_id: String, job_id: String },

    #[error("Invalid identifier '{0}': only ASCII letters, digits, '-', '_' and '.' are allowed")]
    InvalidId(String),

    #[error("Artifact '{name}' not found for job '{job_id}'")]
    ArtifactNotFound { job_id: String, name: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Malformed document {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the job lifecycle API.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to enqueue job: {0}")]
    Enqueue(#[source] QueueError),

    #[error("Job '{job_id}' was queued but its init message could not be published: {source}")]
    InitPublishFailed {
        job_id: String,
        #[source]
        source: QueueError,
    },

    #[error("No broker connection; jobs cannot be submitted")]
    NoBroker,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by a training unit of work.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Invalid training config: {0}")]
    InvalidConfig(String),

    #[error("Unit {unit} failed: {reason}")]
    UnitFailed { unit: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound {
            project_id: "p1".to_string(),
            job_id: "job-1".to_string(),
        };
        assert!(err.to_string().contains("job-1"));
        assert!(err.to_string().contains("p1"));

        let err = StoreError::InvalidId("../etc".to_string());
        assert!(err.to_string().contains("../etc"));
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::InitPublishFailed {
            job_id: "job-9".to_string(),
            source: QueueError::ConnectionFailed("refused".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("job-9"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn test_training_error_display() {
        let err = TrainingError::UnitFailed {
            unit: 3,
            reason: "nan loss".to_string(),
        };
        assert_eq!(err.to_string(), "Unit 3 failed: nan loss");
    }
}
