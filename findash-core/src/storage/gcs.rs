//! Google Cloud Storage through the JSON API (single-request media upload).

use super::ObjectStore;
use crate::auth::TokenSource;
use crate::domain::RemoteObject;
use crate::error::{PipelineError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

pub struct GcsStore {
    client: reqwest::blocking::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl GcsStore {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    pub fn with_base_url(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| PipelineError::Upload(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

impl ObjectStore for GcsStore {
    fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<RemoteObject> {
        let object = RemoteObject::new(bucket, key);
        let body = std::fs::read(local_path)
            .map_err(|e| PipelineError::Upload(format!("{}: {e}", local_path.display())))?;
        let token = self
            .tokens
            .token()
            .map_err(|e| PipelineError::Upload(format!("{object}: {e}")))?;

        let url = format!("{}/upload/storage/v1/b/{bucket}/o", self.base_url);
        debug!(%url, key, bytes = body.len(), "uploading object");

        let resp = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .map_err(|e| PipelineError::Upload(format!("{object}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(PipelineError::Upload(format!(
                "{object}: HTTP {status}: {detail}"
            )));
        }

        Ok(object)
    }
}
