//! Warehouse loading with truncate-and-replace semantics.
//!
//! After a successful load the destination table holds exactly the rows of
//! the source snapshot. Loading the same snapshot twice leaves the same
//! table as loading it once.

pub mod bigquery;
pub mod local;

pub use bigquery::BigQueryWarehouse;
pub use local::LocalWarehouse;

use crate::domain::{RemoteObject, WarehouseTable};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Location used when none is configured, matching the existing dataset.
pub const DEFAULT_LOCATION: &str = "europe-central2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub table: WarehouseTable,
    pub rows: u64,
}

pub trait Warehouse: Send + Sync {
    /// Replace `table` with the Parquet object `source`; blocks until the
    /// load reaches a terminal state.
    fn load(&self, source: &RemoteObject, table: &WarehouseTable, location: &str) -> Result<LoadReport>;
}
