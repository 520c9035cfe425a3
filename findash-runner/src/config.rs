//! Runtime configuration: process environment plus an optional TOML
//! pipeline file.
//!
//! ```toml
//! [range]
//! start = "2000-01-01"
//!
//! [retry]
//! retries = 1
//! delay_secs = 300
//!
//! [warehouse]
//! job_timeout_secs = 600
//!
//! [[sources.countries]]
//! code = "US"
//! label = "United States"
//! ```
//!
//! Every section is optional; missing ones fall back to the defaults.

use chrono::NaiveDate;
use findash_core::domain::DateRange;
use findash_core::error::{PipelineError, Result};
use findash_core::sources::SourceTables;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::RetryPolicy;

pub const ENV_PROJECT: &str = "GCP_PROJECT_ID";
pub const ENV_DATASET: &str = "BQ_DATASET";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_REGION: &str = "REGION";
pub const ENV_BUCKET: &str = "FINDASH_BUCKET";
pub const ENV_RAW_DIR: &str = "FINDASH_RAW_DIR";
pub const ENV_DBT_DIR: &str = "FINDASH_DBT_DIR";
pub const ENV_ACCESS_TOKEN: &str = "GCP_ACCESS_TOKEN";

pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_BUCKET: &str = "financedashboard-raw-data";
pub const DEFAULT_RAW_DIR: &str = "data/raw";
pub const DEFAULT_DBT_DIR: &str = "dbt";

/// Settings read from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub project_id: Option<String>,
    pub dataset: Option<String>,
    pub credentials: Option<PathBuf>,
    pub access_token: Option<String>,
    pub region: String,
    pub bucket: String,
    pub raw_dir: PathBuf,
    pub dbt_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            project_id: get(ENV_PROJECT),
            dataset: get(ENV_DATASET),
            credentials: get(ENV_CREDENTIALS).map(PathBuf::from),
            access_token: get(ENV_ACCESS_TOKEN),
            region: get(ENV_REGION).unwrap_or_else(|| DEFAULT_REGION.into()),
            bucket: get(ENV_BUCKET).unwrap_or_else(|| DEFAULT_BUCKET.into()),
            raw_dir: get(ENV_RAW_DIR).map_or_else(|| PathBuf::from(DEFAULT_RAW_DIR), PathBuf::from),
            dbt_dir: get(ENV_DBT_DIR).map_or_else(|| PathBuf::from(DEFAULT_DBT_DIR), PathBuf::from),
        }
    }

    pub fn require_project(&self) -> Result<&str> {
        require(self.project_id.as_deref(), ENV_PROJECT)
    }

    pub fn require_dataset(&self) -> Result<&str> {
        require(self.dataset.as_deref(), ENV_DATASET)
    }
}

fn require<'a>(value: Option<&'a str>, var: &str) -> Result<&'a str> {
    value.ok_or_else(|| PipelineError::Config(format!("{var} is not set")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSection {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub retries: u32,
    pub delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            retries: 1,
            delay_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSection {
    pub job_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            job_timeout_secs: 600,
            poll_interval_secs: 2,
        }
    }
}

/// Optional pipeline file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineFile {
    pub sources: SourceTables,
    pub range: RangeSection,
    pub retry: RetrySection,
    pub warehouse: WarehouseSection,
}

impl PipelineFile {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PipelineError::Config(format!("pipeline file: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// `None` gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Market date range; open ends default to 2000-01-01 and today.
    pub fn date_range(&self) -> Result<DateRange> {
        let default = DateRange::through_today();
        let range = DateRange {
            start: self.range.start.unwrap_or(default.start),
            end: self.range.end.unwrap_or(default.end),
        };
        if range.start > range.end {
            return Err(PipelineError::Config(format!(
                "range start {} is after end {}",
                range.start, range.end
            )));
        }
        Ok(range)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries,
            delay: Duration::from_secs(self.retry.delay_secs),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.warehouse.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.warehouse.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = RuntimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.bucket, "financedashboard-raw-data");
        assert_eq!(config.raw_dir, PathBuf::from("data/raw"));
        assert_eq!(config.dbt_dir, PathBuf::from("dbt"));
        assert!(config.project_id.is_none());
    }

    #[test]
    fn missing_project_names_the_variable() {
        let config = RuntimeConfig::from_lookup(lookup(&[(ENV_PROJECT, "  ")]));
        let err = config.require_project().unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("GCP_PROJECT_ID"));
    }

    #[test]
    fn environment_values_are_used() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_PROJECT, "proj"),
            (ENV_DATASET, "finance"),
            (ENV_REGION, "europe-central2"),
            (ENV_CREDENTIALS, "/keys/sa.json"),
        ]));
        assert_eq!(config.require_project().unwrap(), "proj");
        assert_eq!(config.require_dataset().unwrap(), "finance");
        assert_eq!(config.region, "europe-central2");
        assert_eq!(config.credentials, Some(PathBuf::from("/keys/sa.json")));
    }

    #[test]
    fn empty_pipeline_file_gives_defaults() {
        let file = PipelineFile::from_toml("").unwrap();
        assert_eq!(file, PipelineFile::default());
        assert_eq!(file.retry_policy().retries, 1);
        assert_eq!(file.retry_policy().delay, Duration::from_secs(300));
        assert_eq!(file.sources.countries.len(), 12);
        assert_eq!(file.date_range().unwrap().start, DateRange::default_start());
    }

    #[test]
    fn sections_override_defaults() {
        let file = PipelineFile::from_toml(
            r#"
            [range]
            start = "2020-01-01"
            end = "2020-12-31"

            [retry]
            retries = 3
            delay_secs = 0

            [[sources.countries]]
            code = "US"
            label = "United States"
            "#,
        )
        .unwrap();

        let range = file.date_range().unwrap();
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2020, 12, 31).unwrap());
        assert_eq!(file.retry_policy().retries, 3);
        assert_eq!(file.sources.countries.len(), 1);
        // Sections not mentioned keep their defaults
        assert_eq!(file.sources.indicators.len(), 4);
        assert_eq!(file.job_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn inverted_range_is_config_error() {
        let file = PipelineFile::from_toml("[range]\nstart = \"2021-01-01\"\nend = \"2020-01-01\"").unwrap();
        assert_eq!(file.date_range().unwrap_err().kind(), "config");
    }

    #[test]
    fn unknown_types_are_config_error() {
        let err = PipelineFile::from_toml("[retry]\nretries = \"many\"").unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
