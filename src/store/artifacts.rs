//! Artifact storage for finished jobs.
//!
//! Artifacts live next to the job's logs under `artifacts/`. Only the
//! reference (path, size, checksum) travels through the result message.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::StoreError;
use crate::scheduler::job::ArtifactRef;

use super::json_log;
use super::layout::{validate_id, StoreLayout};

/// File-based storage for job outputs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: StoreLayout,
}

impl ArtifactStore {
    /// Creates a new artifact store under the given work directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: StoreLayout::new(root),
        }
    }

    /// Writes an artifact and returns its reference.
    ///
    /// Writing the same name twice replaces the previous content.
    pub async fn store(
        &self,
        project_id: &str,
        job_id: &str,
        name: &str,
        data: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        validate_id(name)?;
        let file_path = self.layout.artifacts_dir(project_id, job_id)?.join(name);

        json_log::write_atomic(&file_path, data).await?;

        let relative_path = file_path
            .strip_prefix(self.layout.root())
            .unwrap_or(&file_path)
            .to_string_lossy()
            .to_string();

        Ok(ArtifactRef {
            name: name.to_string(),
            path: relative_path,
            size_bytes: data.len() as u64,
            checksum: Self::compute_checksum(data),
        })
    }

    /// Reads an artifact back, verifying it against its reference.
    pub async fn retrieve(
        &self,
        project_id: &str,
        job_id: &str,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, StoreError> {
        validate_id(&artifact.name)?;
        let file_path = self
            .layout
            .artifacts_dir(project_id, job_id)?
            .join(&artifact.name);

        let data = fs::read(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::ArtifactNotFound {
                    job_id: job_id.to_string(),
                    name: artifact.name.clone(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;

        let actual = Self::compute_checksum(&data);
        if actual != artifact.checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: artifact.checksum.clone(),
                actual,
            });
        }

        Ok(data)
    }

    /// Lists artifact file names written for a job, sorted.
    pub async fn list(&self, project_id: &str, job_id: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.artifacts_dir(project_id, job_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Computes the SHA-256 checksum of data.
    pub fn compute_checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}
