//! Atomic JSON documents.
//!
//! Writers never modify a document in place: the full new content goes to a
//! uniquely named temp file in the same directory, is synced, and is renamed
//! over the target. A reader that opens the target therefore sees either the
//! old or the new document, never a truncated one.
//!
//! Readers fail soft: a missing or malformed document reads as empty.
//! Writers do not: appending to a document that exists but cannot be read
//! as an array is an error, so history is never replaced by a fresh log.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
}

/// Writes `bytes` to `path` via temp file + rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(path);
    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    sync_parent(path).await
}

/// Flushes the directory entry created by the rename.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::File::open(parent).await?.sync_all().await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub async fn write_json_atomic<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json).await
}

/// Reads a JSON array document, treating anything unreadable as empty.
pub async fn read_values(path: &Path) -> Vec<Value> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read document, treating as empty");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Array(values)) => values,
        Ok(_) => {
            warn!(path = %path.display(), "Document is not a JSON array, treating as empty");
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed document, treating as empty");
            Vec::new()
        }
    }
}

/// Reads a JSON array document for modification.
///
/// A missing document is an empty array. Any other read failure, or content
/// that is not a JSON array, is returned as an error.
pub async fn read_values_strict(path: &Path) -> Result<Vec<Value>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Array(values)) => Ok(values),
        Ok(_) => Err(StoreError::Malformed {
            path: path.to_path_buf(),
            reason: "not a JSON array".to_string(),
        }),
        Err(e) => Err(StoreError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Decodes every entry of an array document, skipping entries that do not
/// match `T`.
pub async fn read_entries<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    read_values(path)
        .await
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping undecodable entry");
                None
            }
        })
        .collect()
}

/// Returns the last entry of an array document that decodes as `T`.
pub async fn read_last_entry<T: DeserializeOwned>(path: &Path) -> Option<T> {
    read_values(path)
        .await
        .into_iter()
        .rev()
        .find_map(|value| serde_json::from_value(value).ok())
}

/// Appends `entry` to the array document at `path` and returns the entries
/// that were present before the append.
///
/// Callers must serialize appends to the same document. A document that
/// cannot be read back is left untouched and reported as an error.
pub async fn append_entry(path: &Path, entry: Value) -> Result<Vec<Value>, StoreError> {
    let mut values = read_values_strict(path).await?;
    let previous = values.clone();
    values.push(entry);
    write_json_atomic(path, &values).await?;
    Ok(previous)
}

/// Creates an empty array document unless one already exists.
pub async fn ensure_array(path: &Path) -> Result<(), StoreError> {
    if fs::try_exists(path).await? {
        return Ok(());
    }
    write_json_atomic(path, &Vec::<Value>::new()).await
}
