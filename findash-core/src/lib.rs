//! findash core: the stages of the macro & market ingestion pipeline.
//!
//! - Providers for the statistics and price-series APIs
//! - Fetchers that normalize provider output into typed records
//! - Atomic Parquet snapshot writer
//! - Object storage upload and warehouse loading (truncate-and-replace)
//! - Transformation trigger for the dbt project
//!
//! Orchestration (task graph, retries, run history) lives in `findash-runner`.

pub mod auth;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod provider;
pub mod snapshot;
pub mod sources;
pub mod storage;
pub mod transform;
pub mod warehouse;

pub use error::{PipelineError, Result};
