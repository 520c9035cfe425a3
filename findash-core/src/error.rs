//! Error taxonomy for every pipeline stage.
//!
//! Each variant of [`PipelineError`] is fatal to the task that raised it.
//! Recovery (a fixed retry) belongs to the orchestrator, never to the stage.

use std::path::PathBuf;
use thiserror::Error;

/// Upstream API failures: bad status, transport failure, malformed payload.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status} for {context}")]
    Status {
        provider: &'static str,
        status: u16,
        context: String,
    },

    #[error("{provider} unreachable for {context}: {reason}")]
    Transport {
        provider: &'static str,
        context: String,
        reason: String,
    },

    #[error("{provider} payload malformed for {context}: {reason}")]
    MalformedPayload {
        provider: &'static str,
        context: String,
        reason: String,
    },
}

/// An expected column is absent after normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing column '{column}' for {context}")]
    MissingColumn { column: String, context: String },

    #[error("column '{column}' has unexpected type {actual}")]
    TypeMismatch { column: String, actual: String },

    #[error("dataframe: {0}")]
    Frame(String),
}

impl From<polars::prelude::PolarsError> for SchemaError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Self::Frame(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("warehouse load failed: {0}")]
    Load(String),

    #[error("transformation step '{step}' failed: {detail}")]
    Transform { step: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name of the error kind, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Schema(_) => "schema",
            Self::Io { .. } => "io",
            Self::Upload(_) => "upload",
            Self::Load(_) => "load",
            Self::Transform { .. } => "transform",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_converts_into_pipeline_error() {
        let err: PipelineError = SchemaError::MissingColumn {
            column: "Close".into(),
            context: "^GSPC".into(),
        }
        .into();
        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("missing column 'Close'"));
    }

    #[test]
    fn io_error_mentions_path() {
        let err = PipelineError::io(
            "/nope/macro_data.parquet",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("/nope/macro_data.parquet"));
    }
}
