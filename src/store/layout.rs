//! On-disk layout of the job store.
//!
//! ```text
//! <root>/projects/<pid>/jobs/jobs_info.json       init records
//! <root>/projects/<pid>/jobs/<jid>/state.json     progress entries
//! <root>/projects/<pid>/jobs/<jid>/result.json    result entries
//! <root>/projects/<pid>/jobs/<jid>/job.log        event log
//! <root>/projects/<pid>/jobs/<jid>/artifacts/     worker outputs
//! <root>/cancellations/<jid>.cancel               cancellation markers
//! ```

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Checks that `id` is safe to use as a single path component.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Resolves store paths under a root directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs_dir(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(project_id)?;
        Ok(self.root.join("projects").join(project_id).join("jobs"))
    }

    pub fn jobs_info(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.jobs_dir(project_id)?.join("jobs_info.json"))
    }

    pub fn job_dir(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(job_id)?;
        Ok(self.jobs_dir(project_id)?.join(job_id))
    }

    pub fn progress_log(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(project_id, job_id)?.join("state.json"))
    }

    pub fn result_log(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(project_id, job_id)?.join("result.json"))
    }

    pub fn event_log(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(project_id, job_id)?.join("job.log"))
    }

    pub fn artifacts_dir(&self, project_id: &str, job_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(project_id, job_id)?.join("artifacts"))
    }

    pub fn cancellations_dir(&self) -> PathBuf {
        self.root.join("cancellations")
    }

    pub fn cancel_marker(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(job_id)?;
        Ok(self.cancellations_dir().join(format!("{}.cancel", job_id)))
    }
}
