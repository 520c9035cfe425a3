//! findash runner: orchestration for the ingestion pipeline.
//!
//! - Environment and TOML configuration
//! - Task graph with per-node retry policy and layered planning
//! - Scheduler running each layer in parallel, tracking per-node state
//! - Forward-only pipeline stage tracker
//! - JSONL run history
//! - The pipeline graph itself

pub mod config;
pub mod graph;
pub mod history;
pub mod pipeline;
pub mod scheduler;
pub mod stage;

pub use config::{PipelineFile, RuntimeConfig};
pub use graph::{GraphError, RetryPolicy, Task, TaskGraph};
pub use history::RunHistory;
pub use pipeline::{Pipeline, WarehouseTarget};
pub use scheduler::{NodeOutcome, NodeState, RunReport, RunStatus, Scheduler};
pub use stage::{PipelineStage, StageTracker};
