//! Executes a [`TaskGraph`] layer by layer.
//!
//! Nodes of one layer run in parallel on the rayon pool. A node whose
//! upstream did not succeed is never started and is marked
//! `UpstreamFailed`; nodes outside the failed branch still run. Each node
//! is retried per its own [`RetryPolicy`](crate::graph::RetryPolicy).

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::graph::{GraphError, TaskGraph, TaskNode};
use crate::history::RunHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    UpstreamFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub id: String,
    pub state: NodeState,
    pub attempts: u32,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl NodeOutcome {
    fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: NodeState::Pending,
            attempts: 0,
            error_kind: None,
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Result of one submitted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// In plan order.
    pub nodes: Vec<NodeOutcome>,
}

impl RunReport {
    pub fn node(&self, id: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.state, NodeState::Failed | NodeState::UpstreamFailed))
    }
}

/// Run id: start time plus a short BLAKE3 digest of the graph's node ids.
pub fn run_id(started_at: DateTime<Utc>, graph: &TaskGraph) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(started_at.to_rfc3339().as_bytes());
    for node in graph.nodes() {
        hasher.update(node.id.as_bytes());
    }
    let digest = hasher.finalize().to_hex();
    format!("{}-{}", started_at.format("%Y%m%dT%H%M%S"), &digest[..8])
}

#[derive(Default)]
pub struct Scheduler {
    history: Option<RunHistory>,
    runs: Mutex<Vec<RunReport>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every finished report to `history`.
    pub fn with_history(history: RunHistory) -> Self {
        Self {
            history: Some(history),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Run the graph to completion.
    pub fn submit(&self, graph: &TaskGraph) -> Result<RunReport, GraphError> {
        let layers = graph.plan()?;
        let started_at = Utc::now();
        let run_id = run_id(started_at, graph);
        info!(run_id = %run_id, tasks = graph.len(), layers = layers.len(), "run started");

        let mut outcomes: HashMap<String, NodeOutcome> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), NodeOutcome::pending(&n.id)))
            .collect();

        for layer in &layers {
            let mut runnable: Vec<&TaskNode> = Vec::new();
            for id in layer {
                let Some(node) = graph.node(id) else { continue };
                let blocked = node.upstream.iter().any(|up| {
                    outcomes
                        .get(up)
                        .is_some_and(|o| o.state != NodeState::Succeeded)
                });
                if blocked {
                    if let Some(outcome) = outcomes.get_mut(id) {
                        outcome.state = NodeState::UpstreamFailed;
                    }
                    warn!(task = %id, "skipped: upstream did not succeed");
                } else {
                    if let Some(outcome) = outcomes.get_mut(id) {
                        outcome.state = NodeState::Running;
                    }
                    runnable.push(node);
                }
            }

            let finished: Vec<NodeOutcome> = runnable.par_iter().map(|node| execute(node)).collect();
            for outcome in finished {
                outcomes.insert(outcome.id.clone(), outcome);
            }
        }

        let nodes: Vec<NodeOutcome> = layers
            .iter()
            .flatten()
            .filter_map(|id| outcomes.remove(id))
            .collect();
        let status = if nodes.iter().all(|n| n.state == NodeState::Succeeded) {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Some(Utc::now()),
            status,
            nodes,
        };
        info!(run_id = %report.run_id, status = ?report.status, "run finished");
        self.record(&report);
        Ok(report)
    }

    fn record(&self, report: &RunReport) {
        if let Some(history) = &self.history {
            if let Err(e) = history.append(report) {
                warn!(path = %history.path().display(), "cannot record run: {e}");
            }
        }
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(report.clone());
        }
    }

    /// Latest report for `run_id`, from this scheduler or its history file.
    pub fn observe(&self, run_id: &str) -> Option<RunReport> {
        let local = self
            .runs
            .lock()
            .ok()
            .and_then(|runs| runs.iter().rev().find(|r| r.run_id == run_id).cloned());
        local.or_else(|| {
            self.history
                .as_ref()
                .and_then(|h| h.observe(run_id).ok().flatten())
        })
    }
}

fn execute(node: &TaskNode) -> NodeOutcome {
    let start = Instant::now();
    let max_attempts = node.retry.max_attempts();
    let mut outcome = NodeOutcome::pending(&node.id);

    for attempt in 1..=max_attempts {
        outcome.attempts = attempt;
        info!(task = %node.id, attempt, "task started");

        match node.task.run() {
            Ok(()) => {
                outcome.state = NodeState::Succeeded;
                outcome.error_kind = None;
                outcome.error = None;
                info!(task = %node.id, attempt, "task succeeded");
                break;
            }
            Err(e) => {
                outcome.state = NodeState::Failed;
                outcome.error_kind = Some(e.kind().to_string());
                outcome.error = Some(e.to_string());
                if attempt < max_attempts {
                    warn!(task = %node.id, attempt, "task failed, retrying in {:?}: {e}", node.retry.delay);
                    std::thread::sleep(node.retry.delay);
                } else {
                    error!(task = %node.id, attempt, "task failed: {e}");
                }
            }
        }
    }

    outcome.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RetryPolicy;
    use findash_core::error::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ok() -> Result<(), PipelineError> {
        Ok(())
    }

    fn boom() -> Result<(), PipelineError> {
        Err(PipelineError::Upload("bucket unreachable".into()))
    }

    fn quick_retry(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn successful_graph_runs_every_node_once() {
        let mut g = TaskGraph::new();
        g.add("a", &[], RetryPolicy::NONE, ok).unwrap();
        g.add("b", &["a"], RetryPolicy::NONE, ok).unwrap();

        let report = Scheduler::new().submit(&g).unwrap();

        assert!(report.is_success());
        assert!(report.nodes.iter().all(|n| n.attempts == 1));
        assert_eq!(report.nodes[0].id, "a");
    }

    #[test]
    fn failure_blocks_only_its_descendants() {
        let mut g = TaskGraph::new();
        g.add("fetch_macro", &[], RetryPolicy::NONE, boom).unwrap();
        g.add("fetch_market", &[], RetryPolicy::NONE, ok).unwrap();
        g.add("market_report", &["fetch_market"], RetryPolicy::NONE, ok).unwrap();
        g.add("upload", &["fetch_macro", "fetch_market"], RetryPolicy::NONE, ok).unwrap();
        g.add("load", &["upload"], RetryPolicy::NONE, ok).unwrap();

        let report = Scheduler::new().submit(&g).unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        let state = |id: &str| report.node(id).unwrap().state;
        assert_eq!(state("fetch_macro"), NodeState::Failed);
        assert_eq!(state("fetch_market"), NodeState::Succeeded);
        assert_eq!(state("market_report"), NodeState::Succeeded);
        assert_eq!(state("upload"), NodeState::UpstreamFailed);
        assert_eq!(state("load"), NodeState::UpstreamFailed);
        assert_eq!(report.node("fetch_macro").unwrap().error_kind.as_deref(), Some("upload"));
    }

    #[test]
    fn transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let flaky = move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PipelineError::Load("job backend error".into()))
            } else {
                Ok(())
            }
        };

        let mut g = TaskGraph::new();
        g.add("load", &[], quick_retry(1), flaky).unwrap();
        let report = Scheduler::new().submit(&g).unwrap();

        assert!(report.is_success());
        assert_eq!(report.node("load").unwrap().attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let always = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            boom()
        };

        let mut g = TaskGraph::new();
        g.add("upload", &[], quick_retry(2), always).unwrap();
        let report = Scheduler::new().submit(&g).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let node = report.node("upload").unwrap();
        assert_eq!(node.state, NodeState::Failed);
        assert!(node.error.as_deref().unwrap().contains("bucket unreachable"));
    }

    #[test]
    fn observe_returns_submitted_run() {
        let mut g = TaskGraph::new();
        g.add("a", &[], RetryPolicy::NONE, ok).unwrap();
        let scheduler = Scheduler::new();
        let report = scheduler.submit(&g).unwrap();

        assert_eq!(scheduler.observe(&report.run_id), Some(report));
        assert!(scheduler.observe("nope").is_none());
    }

    #[test]
    fn cyclic_graph_is_rejected_before_running() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut g = TaskGraph::new();
        g.add("a", &["b"], RetryPolicy::NONE, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ok()
        })
        .unwrap();
        g.add("b", &["a"], RetryPolicy::NONE, ok).unwrap();

        assert!(Scheduler::new().submit(&g).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
