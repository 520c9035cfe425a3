//! The ingestion pipeline as a task graph.
//!
//! ```text
//! fetch_macro_data ─┐                  ┌─ load_macro_data_to_bq ──┐
//!                   ├─ upload_to_gcs ──┤                          ├─ run_dbt_transformations ─ run_dbt_tests
//! fetch_market_data ┘                  └─ load_market_data_to_bq ─┘
//! ```
//!
//! Without a transform runner (dry runs) the two dbt nodes are left out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use findash_core::domain::{
    DateRange, RemoteObject, SnapshotInfo, WarehouseTable, MACRO_SNAPSHOT, MACRO_TABLE,
    MARKET_SNAPSHOT, MARKET_TABLE,
};
use findash_core::error::{PipelineError, Result};
use findash_core::fetch::{indicator_frame, price_frame, MacroFetcher, MarketFetcher};
use findash_core::provider::{IndicatorProvider, PriceProvider};
use findash_core::snapshot::{SnapshotKind, SnapshotWriter};
use findash_core::sources::SourceTables;
use findash_core::storage::{upload_snapshots, ObjectStore};
use findash_core::transform::TransformRunner;
use findash_core::warehouse::{LoadReport, Warehouse};
use tracing::info;

use crate::graph::{GraphError, RetryPolicy, Task, TaskGraph};
use crate::scheduler::{RunReport, Scheduler};
use crate::stage::{PipelineStage, StageTracker};

pub const FETCH_MACRO: &str = "fetch_macro_data";
pub const FETCH_MARKET: &str = "fetch_market_data";
pub const UPLOAD: &str = "upload_to_gcs";
pub const LOAD_MACRO: &str = "load_macro_data_to_bq";
pub const LOAD_MARKET: &str = "load_market_data_to_bq";
pub const RUN_DBT: &str = "run_dbt_transformations";
pub const TEST_DBT: &str = "run_dbt_tests";

/// Where loaded tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub project: String,
    pub dataset: String,
    pub location: String,
}

impl WarehouseTarget {
    pub fn table(&self, name: &str) -> WarehouseTable {
        WarehouseTable::new(&self.project, &self.dataset, name)
    }
}

/// Everything one run needs. Collaborators are trait objects so a dry run
/// can swap in local implementations.
pub struct Pipeline {
    pub sources: SourceTables,
    pub range: DateRange,
    pub raw_dir: PathBuf,
    pub bucket: String,
    pub target: WarehouseTarget,
    pub indicators: Arc<dyn IndicatorProvider>,
    pub prices: Arc<dyn PriceProvider>,
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub transform: Option<Arc<TransformRunner>>,
    pub stages: Arc<StageTracker>,
}

impl Pipeline {
    fn writer(&self) -> SnapshotWriter {
        SnapshotWriter::new(&self.raw_dir)
    }

    /// Move the tracker to `Failed` when a stage gives up.
    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.stages.fail();
        }
        result
    }

    fn try_fetch_macro(&self) -> Result<SnapshotInfo> {
        self.stages.advance(PipelineStage::Fetching);
        let records = MacroFetcher::new(self.indicators.as_ref(), &self.sources).fetch_all()?;

        self.stages.advance(PipelineStage::Writing);
        let mut df = indicator_frame(&records)?;
        self.writer().write(SnapshotKind::Macro, &mut df, MACRO_SNAPSHOT)
    }

    fn try_fetch_market(&self) -> Result<SnapshotInfo> {
        self.stages.advance(PipelineStage::Fetching);
        let points = MarketFetcher::new(self.prices.as_ref(), &self.sources.index_symbols, self.range)
            .fetch_all()?;

        self.stages.advance(PipelineStage::Writing);
        let mut df = price_frame(&points)?;
        self.writer().write(SnapshotKind::Market, &mut df, MARKET_SNAPSHOT)
    }

    fn try_upload(&self) -> Result<Vec<RemoteObject>> {
        self.stages.advance(PipelineStage::Uploading);
        upload_snapshots(self.store.as_ref(), &self.bucket, &self.raw_dir)
    }

    fn try_load(&self, snapshot: &str, table: &str) -> Result<LoadReport> {
        self.stages.advance(PipelineStage::Loading);
        let source = RemoteObject::raw(&self.bucket, snapshot);
        self.warehouse
            .load(&source, &self.target.table(table), &self.target.location)
    }

    fn transform_runner(&self) -> Result<&TransformRunner> {
        self.transform
            .as_deref()
            .ok_or_else(|| PipelineError::Config("no transformation project configured".into()))
    }

    fn try_transform(&self) -> Result<()> {
        self.stages.advance(PipelineStage::Transforming);
        self.transform_runner()?.run()
    }

    fn try_test(&self) -> Result<()> {
        self.stages.advance(PipelineStage::Testing);
        self.transform_runner()?.test()
    }

    pub fn fetch_macro(&self) -> Result<SnapshotInfo> {
        self.settle(self.try_fetch_macro())
    }

    pub fn fetch_market(&self) -> Result<SnapshotInfo> {
        self.settle(self.try_fetch_market())
    }

    pub fn upload(&self) -> Result<Vec<RemoteObject>> {
        self.settle(self.try_upload())
    }

    pub fn load(&self, snapshot: &str, table: &str) -> Result<LoadReport> {
        self.settle(self.try_load(snapshot, table))
    }

    pub fn transform(&self) -> Result<()> {
        self.settle(self.try_transform())
    }

    pub fn test(&self) -> Result<()> {
        self.settle(self.try_test())
    }

    /// A graph task for `op`. Earlier attempts may fail and be retried; the
    /// last allowed attempt failing fails the tracker right away.
    fn stage_task<F>(self: &Arc<Self>, retry: RetryPolicy, op: F) -> impl Task + 'static
    where
        F: Fn(&Pipeline) -> Result<()> + Send + Sync + 'static,
    {
        let p = Arc::clone(self);
        let attempts = AtomicU32::new(0);
        move || {
            let result = op(p.as_ref());
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= retry.max_attempts() {
                p.settle(result)
            } else {
                result
            }
        }
    }

    /// The pipeline DAG, every node with the same retry policy.
    pub fn graph(self: &Arc<Self>, retry: RetryPolicy) -> Result<TaskGraph, GraphError> {
        let mut g = TaskGraph::new();

        g.add(FETCH_MACRO, &[], retry, self.stage_task(retry, |p| p.try_fetch_macro().map(drop)))?;
        g.add(FETCH_MARKET, &[], retry, self.stage_task(retry, |p| p.try_fetch_market().map(drop)))?;
        g.add(
            UPLOAD,
            &[FETCH_MACRO, FETCH_MARKET],
            retry,
            self.stage_task(retry, |p| p.try_upload().map(drop)),
        )?;
        g.add(
            LOAD_MACRO,
            &[UPLOAD],
            retry,
            self.stage_task(retry, |p| p.try_load(MACRO_SNAPSHOT, MACRO_TABLE).map(drop)),
        )?;
        g.add(
            LOAD_MARKET,
            &[UPLOAD],
            retry,
            self.stage_task(retry, |p| p.try_load(MARKET_SNAPSHOT, MARKET_TABLE).map(drop)),
        )?;

        if self.transform.is_some() {
            g.add(
                RUN_DBT,
                &[LOAD_MACRO, LOAD_MARKET],
                retry,
                self.stage_task(retry, |p| p.try_transform()),
            )?;
            g.add(TEST_DBT, &[RUN_DBT], retry, self.stage_task(retry, |p| p.try_test()))?;
        }

        Ok(g)
    }

    /// Build the graph, run it, and settle the stage tracker.
    pub fn run(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        retry: RetryPolicy,
    ) -> Result<RunReport, GraphError> {
        let report = scheduler.submit(&self.graph(retry)?)?;
        let stage = if report.is_success() {
            self.stages.advance(PipelineStage::Done)
        } else {
            self.stages.fail()
        };
        info!(run_id = %report.run_id, %stage, "pipeline finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findash_core::provider::WorldBankProvider;
    use findash_core::provider::YahooProvider;
    use findash_core::storage::LocalStore;
    use findash_core::warehouse::LocalWarehouse;

    fn pipeline(transform: Option<TransformRunner>) -> Arc<Pipeline> {
        let store = LocalStore::new(std::env::temp_dir().join("findash-graph-shape"));
        Arc::new(Pipeline {
            sources: SourceTables::default(),
            range: DateRange::through_today(),
            raw_dir: PathBuf::from("data/raw"),
            bucket: "financedashboard-raw-data".into(),
            target: WarehouseTarget {
                project: "proj".into(),
                dataset: "finance".into(),
                location: "us-central1".into(),
            },
            indicators: Arc::new(WorldBankProvider::new().unwrap()),
            prices: Arc::new(YahooProvider::new().unwrap()),
            store: Arc::new(store.clone()),
            warehouse: Arc::new(LocalWarehouse::new(store)),
            transform: transform.map(Arc::new),
            stages: Arc::new(StageTracker::new()),
        })
    }

    #[test]
    fn full_graph_has_five_layers() {
        let layers = pipeline(Some(TransformRunner::new("dbt")))
            .graph(RetryPolicy::default())
            .unwrap()
            .plan()
            .unwrap();

        assert_eq!(
            layers,
            vec![
                vec![FETCH_MACRO.to_string(), FETCH_MARKET.to_string()],
                vec![UPLOAD.to_string()],
                vec![LOAD_MACRO.to_string(), LOAD_MARKET.to_string()],
                vec![RUN_DBT.to_string()],
                vec![TEST_DBT.to_string()],
            ]
        );
    }

    #[test]
    fn without_transform_the_graph_stops_at_loading() {
        let graph = pipeline(None).graph(RetryPolicy::NONE).unwrap();
        assert_eq!(graph.len(), 5);
        assert!(graph.node(RUN_DBT).is_none());
    }

    #[test]
    fn every_node_carries_the_policy() {
        let graph = pipeline(None).graph(RetryPolicy::default()).unwrap();
        assert!(graph
            .nodes()
            .iter()
            .all(|n| n.retry == RetryPolicy::default()));
    }
}
