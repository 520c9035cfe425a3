//! Records and identifiers that flow between pipeline stages.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Prefix under which every snapshot is stored in the bucket.
pub const RAW_PREFIX: &str = "raw/";

pub const MACRO_SNAPSHOT: &str = "macro_data.parquet";
pub const MARKET_SNAPSHOT: &str = "market_indices.parquet";

pub const MACRO_TABLE: &str = "macro_data";
pub const MARKET_TABLE: &str = "market_indices";

/// One observation of an indicator for a country and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub country_code: String,
    pub indicator_code: String,
    pub year: i32,
    pub value: f64,
}

/// Closing level of a country's benchmark index on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPricePoint {
    pub date: NaiveDateTime,
    pub country_code: String,
    pub close_price: f64,
}

/// Inclusive date range requested from a price provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Earliest date the market history is pulled from.
    pub fn default_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    /// `2000-01-01` through today. Each run captures data as of invocation.
    pub fn through_today() -> Self {
        Self {
            start: Self::default_start(),
            end: chrono::Local::now().date_naive(),
        }
    }
}

/// A snapshot file that was written locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub rows: usize,
    pub content_hash: String,
}

/// An uploaded object: `(bucket, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObject {
    pub bucket: String,
    pub key: String,
}

impl RemoteObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Object for a snapshot file name under the fixed `raw/` prefix.
    pub fn raw(bucket: impl Into<String>, file_name: &str) -> Self {
        Self::new(bucket, format!("{RAW_PREFIX}{file_name}"))
    }

    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Destination table in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WarehouseTable {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl WarehouseTable {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for WarehouseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}
