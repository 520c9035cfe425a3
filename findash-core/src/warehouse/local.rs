//! In-memory warehouse over a [`LocalStore`] bucket.
//!
//! Used for dry runs and tests. Each load reads the Parquet object and
//! replaces the whole table.

use super::{LoadReport, Warehouse};
use crate::domain::{RemoteObject, WarehouseTable};
use crate::error::{PipelineError, Result};
use crate::snapshot::read_snapshot;
use crate::storage::LocalStore;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub struct LocalWarehouse {
    store: LocalStore,
    tables: Mutex<HashMap<WarehouseTable, DataFrame>>,
}

impl LocalWarehouse {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<WarehouseTable, DataFrame>>> {
        self.tables
            .lock()
            .map_err(|_| PipelineError::Load("warehouse state poisoned".into()))
    }

    /// Put rows into a table directly, bypassing the load path.
    pub fn seed(&self, table: WarehouseTable, rows: DataFrame) -> Result<()> {
        self.lock()?.insert(table, rows);
        Ok(())
    }

    /// Current contents of `table`, if it exists.
    pub fn table(&self, table: &WarehouseTable) -> Result<Option<DataFrame>> {
        Ok(self.lock()?.get(table).cloned())
    }

    pub fn row_count(&self, table: &WarehouseTable) -> Result<u64> {
        Ok(self.lock()?.get(table).map_or(0, |df| df.height() as u64))
    }
}

impl Warehouse for LocalWarehouse {
    fn load(&self, source: &RemoteObject, table: &WarehouseTable, _location: &str) -> Result<LoadReport> {
        let path = self.store.object_path(source);
        let rows = read_snapshot(&path).map_err(|e| PipelineError::Load(format!("{source}: {e}")))?;
        let count = rows.height() as u64;

        self.lock()?.insert(table.clone(), rows);
        info!("Loaded {} rows into {}", count, table);
        Ok(LoadReport {
            table: table.clone(),
            rows: count,
        })
    }
}
