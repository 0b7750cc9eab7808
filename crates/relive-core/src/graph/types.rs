//! Types for the task graph.

use std::any::Any;
use std::fmt;

use crate::error::Result;

use super::Scheduler;

/// Unique identifier for a node within one scheduler.
///
/// Ids are issued in increasing order and never reused, so an id below
/// the scheduler's counter that is no longer in the graph belongs to a
/// node that finished and was pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for at least one dependency to finish.
    Pending,
    /// All dependencies finished; waiting for a worker.
    Ready,
    /// Currently executing on a worker.
    Running,
    /// Done, whatever the outcome.
    Finished,
}

/// How a node's unit of work ended.
///
/// Recorded for inspection only. The graph never acts on it: dependents
/// of a failed node still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Succeeded,
    Failed(String),
    Panicked(String),
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A single-shot unit of work.
///
/// It receives the scheduler that runs it, so work can be handed further
/// down (the reload pipeline passes it to the script's entry point).
pub type Task = Box<dyn FnOnce(&Scheduler) -> Result<()> + Send + 'static>;

/// A labelled unit of work plus the nodes it must wait for.
pub struct Node {
    pub(crate) label: String,
    pub(crate) dependencies: Vec<NodeId>,
    pub(crate) task: Task,
}

impl Node {
    /// Create a node with no dependencies.
    pub fn new(
        label: impl Into<String>,
        task: impl FnOnce(&Scheduler) -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            dependencies: Vec::new(),
            task: Box::new(task),
        }
    }

    /// Require `id` to finish before this node starts.
    pub fn depends_on(mut self, id: NodeId) -> Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("label", &self.label)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
