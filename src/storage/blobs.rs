//! JSON blob store on the local filesystem

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result, StorageError};

/// Writes pretty-printed JSON documents under a root directory
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize `value` to `<root>/<name>` and return the full path
    pub async fn write_json<T>(&self, name: &str, value: &T) -> Result<PathBuf>
    where
        T: Serialize + ?Sized,
    {
        let path = self.root.join(name);
        let blob_error = |reason: String| {
            Error::Storage(StorageError::BlobWrite {
                path: path.display().to_string(),
                reason,
            })
        };

        let body = serde_json::to_vec_pretty(value).map_err(|e| blob_error(e.to_string()))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| blob_error(format!("failed to create blob directory: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| blob_error(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Blob written");
        Ok(path)
    }
}
