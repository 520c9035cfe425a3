//! Task graph: named nodes, upstream edges and a per-node retry policy.
//!
//! [`TaskGraph::plan`] orders the nodes into layers with Kahn's algorithm.
//! Layer N depends only on layers 0..N-1, so the nodes of one layer can run
//! in parallel.

use findash_core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate task id '{0}'")]
    DuplicateNode(String),

    #[error("task '{node}' depends on unknown task '{upstream}'")]
    UnknownUpstream { node: String, upstream: String },

    #[error("graph contains a cycle: resolved {resolved}/{total} tasks")]
    Cycle { resolved: usize, total: usize },
}

/// Fixed-delay retry applied uniformly to every failure of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        retries: 0,
        delay: Duration::ZERO,
    };

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

impl Default for RetryPolicy {
    /// One retry after five minutes.
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

/// A unit of work. Every error is fatal to the attempt.
pub trait Task: Send + Sync {
    fn run(&self) -> Result<(), PipelineError>;
}

impl<F> Task for F
where
    F: Fn() -> Result<(), PipelineError> + Send + Sync,
{
    fn run(&self) -> Result<(), PipelineError> {
        self()
    }
}

#[derive(Clone)]
pub struct TaskNode {
    pub id: String,
    pub upstream: Vec<String>,
    pub retry: RetryPolicy,
    pub task: Arc<dyn Task>,
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("upstream", &self.upstream)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Upstream ids are checked in [`TaskGraph::plan`], so
    /// nodes may be added in any order.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        upstream: &[&str],
        retry: RetryPolicy,
        task: impl Task + 'static,
    ) -> Result<&mut Self, GraphError> {
        let id = id.into();
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.push(TaskNode {
            id,
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
            retry,
            task: Arc::new(task),
        });
        Ok(self)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node reachable downstream of `id`.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for node in &self.nodes {
                if node.upstream.contains(&current) && !found.contains(&node.id) {
                    found.push(node.id.clone());
                    queue.push_back(node.id.clone());
                }
            }
        }
        found
    }

    /// Topological layers. Within a layer, nodes keep insertion order.
    pub fn plan(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in &self.nodes {
            in_degree.insert(&node.id, 0);
            downstream.insert(&node.id, Vec::new());
        }

        for node in &self.nodes {
            for up in &node.upstream {
                let edges = downstream
                    .get_mut(up.as_str())
                    .ok_or_else(|| GraphError::UnknownUpstream {
                        node: node.id.clone(),
                        upstream: up.clone(),
                    })?;
                edges.push(&node.id);
                *in_degree.entry(&node.id).or_insert(0) += 1;
            }
        }

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut ready: Vec<&str> = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut resolved = 0;

        while !ready.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for id in &ready {
                resolved += 1;
                for child in &downstream[id] {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*child);
                        }
                    }
                }
            }
            // Keep declaration order inside the layer.
            next.sort_by_key(|id| self.nodes.iter().position(|n| n.id == *id));
            layers.push(ready.iter().map(|s| s.to_string()).collect());
            ready = next;
        }

        if resolved != self.nodes.len() {
            return Err(GraphError::Cycle {
                resolved,
                total: self.nodes.len(),
            });
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn noop() -> Result<(), PipelineError> {
        Ok(())
    }

    fn graph(edges: &[(&str, Vec<&str>)]) -> TaskGraph {
        let mut g = TaskGraph::new();
        for (id, upstream) in edges {
            g.add(*id, upstream, RetryPolicy::NONE, noop).unwrap();
        }
        g
    }

    #[test]
    fn diamond_plans_into_three_layers() {
        let g = graph(&[
            ("fetch_a", vec![]),
            ("fetch_b", vec![]),
            ("upload", vec!["fetch_a", "fetch_b"]),
            ("load", vec!["upload"]),
        ]);
        let layers = g.plan().unwrap();
        assert_eq!(
            layers,
            vec![
                vec!["fetch_a".to_string(), "fetch_b".to_string()],
                vec!["upload".to_string()],
                vec!["load".to_string()],
            ]
        );
    }

    #[test]
    fn nodes_may_be_declared_before_their_upstream() {
        let g = graph(&[("b", vec!["a"]), ("a", vec![])]);
        assert_eq!(g.plan().unwrap(), vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn cycle_is_reported() {
        let g = graph(&[("a", vec!["b"]), ("b", vec!["a"]), ("c", vec![])]);
        assert_eq!(g.plan().unwrap_err(), GraphError::Cycle { resolved: 1, total: 3 });
    }

    #[test]
    fn unknown_upstream_is_reported() {
        let g = graph(&[("load", vec!["upload"])]);
        assert!(matches!(g.plan(), Err(GraphError::UnknownUpstream { .. })));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut g = TaskGraph::new();
        g.add("a", &[], RetryPolicy::NONE, noop).unwrap();
        let err = g.add("a", &[], RetryPolicy::NONE, noop).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn descendants_are_transitive() {
        let g = graph(&[("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"]), ("d", vec![])]);
        assert_eq!(g.descendants("a"), vec!["b".to_string(), "c".to_string()]);
        assert!(g.descendants("d").is_empty());
    }

    #[test]
    fn default_retry_is_one_after_five_minutes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay, Duration::from_secs(300));
    }

    proptest! {
        /// Random acyclic graphs: edges only point from lower to higher index.
        #[test]
        fn every_node_is_planned_after_its_upstream(
            edges in proptest::collection::vec((0usize..12, 0usize..12), 0..40)
        ) {
            let mut g = TaskGraph::new();
            for i in 0..12usize {
                let ups: Vec<String> = edges
                    .iter()
                    .filter(|(from, to)| *to == i && from < to)
                    .map(|(from, _)| format!("n{from}"))
                    .collect();
                let ups: Vec<&str> = ups.iter().map(String::as_str).collect();
                g.add(format!("n{i}"), &ups, RetryPolicy::NONE, noop).unwrap();
            }

            let layers = g.plan().unwrap();
            let layer_of = |id: &str| layers.iter().position(|l| l.iter().any(|n| n == id)).unwrap();

            prop_assert_eq!(layers.iter().map(Vec::len).sum::<usize>(), 12);
            for node in g.nodes() {
                for up in &node.upstream {
                    prop_assert!(layer_of(up) < layer_of(&node.id));
                }
            }
        }
    }
}
