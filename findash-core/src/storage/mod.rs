//! Object storage: copies snapshot files into a bucket under `raw/`.
//!
//! Uploads overwrite. No retry here; a failed upload is fatal to the task
//! and the scheduler decides whether to try again.

pub mod gcs;
pub mod local;

pub use gcs::GcsStore;
pub use local::LocalStore;

use crate::domain::RemoteObject;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub trait ObjectStore: Send + Sync {
    /// Copy `local_path` to `bucket/key`, replacing any existing object.
    fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<RemoteObject>;
}

/// Snapshot files in `dir`, sorted by file name.
pub fn snapshot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Upload every `*.parquet` file in `dir` as `raw/<file name>`.
pub fn upload_snapshots(
    store: &dyn ObjectStore,
    bucket: &str,
    dir: &Path,
) -> Result<Vec<RemoteObject>> {
    let mut uploaded = Vec::new();
    for path in snapshot_files(dir)? {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Upload(format!("non-UTF-8 file name: {}", path.display())))?;
        let target = RemoteObject::raw(bucket, file_name);
        let object = store.upload(bucket, &path, &target.key)?;
        info!("Uploaded {} to {}", path.display(), object);
        uploaded.push(object);
    }
    Ok(uploaded)
}
