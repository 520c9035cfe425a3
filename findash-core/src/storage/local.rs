//! Directory-backed bucket: `<root>/<bucket>/<key>`.

use super::ObjectStore;
use crate::domain::RemoteObject;
use crate::error::{PipelineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, object: &RemoteObject) -> PathBuf {
        self.root.join(&object.bucket).join(&object.key)
    }
}

impl ObjectStore for LocalStore {
    fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<RemoteObject> {
        let object = RemoteObject::new(bucket, key);
        let dest = self.object_path(&object);
        let upload_err =
            |e: std::io::Error| PipelineError::Upload(format!("{} -> {object}: {e}", local_path.display()));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(upload_err)?;
        }

        // Copy beside the destination and rename so readers never see a partial object.
        let tmp = dest.with_extension("upload.tmp");
        if let Err(e) = fs::copy(local_path, &tmp).and_then(|_| fs::rename(&tmp, &dest)) {
            let _ = fs::remove_file(&tmp);
            return Err(upload_err(e));
        }

        debug!(dest = %dest.display(), "object written");
        Ok(object)
    }
}
