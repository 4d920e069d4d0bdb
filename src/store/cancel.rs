//! Cancellation markers.
//!
//! A marker is an empty file named after the job. Presence is the signal;
//! markers are never cleared here.

use std::path::PathBuf;

use tokio::fs;
use tracing::info;

use crate::error::StoreError;

use super::json_log;
use super::layout::StoreLayout;

/// Write-once, read-many cancellation flags keyed by job id.
#[derive(Debug, Clone)]
pub struct CancelMarkers {
    layout: StoreLayout,
}

impl CancelMarkers {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: StoreLayout::new(root),
        }
    }

    /// Sets the marker for `job_id`. Returns `false` if it was already set.
    pub async fn set(&self, job_id: &str) -> Result<bool, StoreError> {
        let path = self.layout.cancel_marker(job_id)?;
        if fs::try_exists(&path).await? {
            return Ok(false);
        }

        json_log::write_atomic(&path, b"").await?;
        info!(job_id, "Cancellation requested");
        Ok(true)
    }

    /// Returns whether the marker for `job_id` is set.
    pub async fn is_set(&self, job_id: &str) -> Result<bool, StoreError> {
        let path = self.layout.cancel_marker(job_id)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_and_check() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let markers = CancelMarkers::new(temp_dir.path());

        assert!(!markers.is_set("job-1").await.expect("check"));
        assert!(markers.set("job-1").await.expect("set"));
        assert!(markers.is_set("job-1").await.expect("check"));
        assert!(!markers.is_set("job-2").await.expect("check"));

        assert!(temp_dir.path().join("cancellations/job-1.cancel").exists());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let markers = CancelMarkers::new(temp_dir.path());

        assert!(markers.set("job-1").await.expect("set"));
        assert!(!markers.set("job-1").await.expect("set again"));
        assert!(markers.is_set("job-1").await.expect("check"));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_id() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let markers = CancelMarkers::new(temp_dir.path());
        assert!(matches!(
            markers.set("../job").await,
            Err(StoreError::InvalidId(_))
        ));
    }
}
