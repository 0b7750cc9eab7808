//! Dependency-graph scheduler backed by a worker pool.
//!
//! Nodes are stored in a `StableDiGraph` with edges pointing from a
//! dependency to its dependents. Each node keeps a count of unfinished
//! dependencies; when a node finishes, the worker that ran it decrements
//! the counters of its dependents and dispatches every one that reaches
//! zero. Dispatching means moving the node's task onto the rayon pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::types::{Node, NodeId, NodeOutcome, NodeState, Task, panic_message};

/// Configuration for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            thread_name: "relive-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Config with an explicit worker count (at least one).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }
}

/// Per-node bookkeeping held by the graph.
struct NodeSlot {
    id: NodeId,
    label: String,
    state: NodeState,
    /// Taken when the node is dispatched.
    task: Option<Task>,
    /// Dependencies that have not finished yet.
    unmet: usize,
    /// Set by `execute()`; only released nodes are dispatched.
    released: bool,
    outcome: Option<NodeOutcome>,
}

#[derive(Default)]
struct GraphState {
    graph: StableDiGraph<NodeSlot, ()>,
    index: FxHashMap<NodeId, NodeIndex>,
    next_id: u64,
}

impl GraphState {
    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.index.get(&id).map(|&idx| &self.graph[idx])
    }

    fn is_finished(&self, id: NodeId) -> bool {
        // Pruned nodes were finished.
        self.slot(id)
            .is_none_or(|slot| slot.state == NodeState::Finished)
    }

    /// Take the task of a released, ready node and mark it running.
    fn claim(&mut self, idx: NodeIndex) -> Option<(NodeId, Task)> {
        let slot = &mut self.graph[idx];
        if slot.state != NodeState::Ready || !slot.released {
            return None;
        }
        let task = slot.task.take()?;
        slot.state = NodeState::Running;
        Some((slot.id, task))
    }
}

struct Shared {
    pool: rayon::ThreadPool,
    state: Mutex<GraphState>,
    finished: Condvar,
}

/// Dependency-aware executor for single-shot units of work.
///
/// Cloning is cheap; all clones drive the same graph and worker pool.
///
/// Typical use is `add_node`, `execute`, `wait_all`, `prune_finished`.
/// Nodes may be added while others run; they start on the next
/// `execute()`.
///
/// Calling `wait_all` or `wait_for` from inside a task can deadlock when
/// every worker is busy waiting.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with its own worker pool.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let prefix = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| Error::Scheduling(format!("failed to start worker pool: {}", e)))?;

        tracing::debug!("Started scheduler with {} workers", config.workers.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                state: Mutex::new(GraphState::default()),
                finished: Condvar::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a node.
    ///
    /// Every dependency must be an id returned by an earlier `add_node`
    /// on this scheduler. Dependencies that already finished (or were
    /// pruned) count as satisfied.
    pub fn add_node(&self, node: Node) -> Result<NodeId> {
        let mut state = self.lock();

        for dep in &node.dependencies {
            if dep.0 >= state.next_id {
                return Err(Error::UnknownNode(*dep));
            }
        }

        let id = NodeId(state.next_id);
        state.next_id += 1;

        let pending: Vec<NodeIndex> = node
            .dependencies
            .iter()
            .filter(|dep| !state.is_finished(**dep))
            .filter_map(|dep| state.index.get(dep).copied())
            .collect();

        let idx = state.graph.add_node(NodeSlot {
            id,
            label: node.label,
            state: if pending.is_empty() {
                NodeState::Ready
            } else {
                NodeState::Pending
            },
            task: Some(node.task),
            unmet: pending.len(),
            released: false,
            outcome: None,
        });
        for dep_idx in pending {
            state.graph.add_edge(dep_idx, idx, ());
        }
        state.index.insert(id, idx);

        tracing::debug!("Added {} ({})", id, state.graph[idx].label);
        Ok(id)
    }

    /// Release every registered node and dispatch those that are ready.
    ///
    /// Returns immediately. Nodes still waiting on dependencies are
    /// dispatched by the worker that finishes their last dependency.
    pub fn execute(&self) {
        let mut state = self.lock();
        let indices: Vec<NodeIndex> = state.graph.node_indices().collect();

        let mut ready = Vec::new();
        for idx in indices {
            state.graph[idx].released = true;
            if let Some(claimed) = state.claim(idx) {
                ready.push(claimed);
            }
        }
        drop(state);

        for (id, task) in ready {
            self.dispatch(id, task);
        }
    }

    fn dispatch(&self, id: NodeId, task: Task) {
        let scheduler = self.clone();
        self.shared.pool.spawn(move || scheduler.run_node(id, task));
    }

    /// Worker-side body: run the task, record the outcome, unlock dependents.
    fn run_node(&self, id: NodeId, task: Task) {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(self))) {
            Ok(Ok(())) => NodeOutcome::Succeeded,
            Ok(Err(e)) => NodeOutcome::Failed(e.to_string()),
            Err(payload) => NodeOutcome::Panicked(panic_message(payload.as_ref())),
        };

        let mut state = self.lock();
        let Some(&idx) = state.index.get(&id) else {
            return;
        };

        match &outcome {
            NodeOutcome::Succeeded => {
                tracing::debug!("{} ({}) finished", id, state.graph[idx].label)
            }
            NodeOutcome::Failed(msg) => {
                tracing::warn!("{} ({}) failed: {}", id, state.graph[idx].label, msg)
            }
            NodeOutcome::Panicked(msg) => {
                tracing::error!("{} ({}) panicked: {}", id, state.graph[idx].label, msg)
            }
        }

        let slot = &mut state.graph[idx];
        slot.state = NodeState::Finished;
        slot.outcome = Some(outcome);

        let dependents: Vec<NodeIndex> = state
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();

        let mut ready = Vec::new();
        for dep_idx in dependents {
            let slot = &mut state.graph[dep_idx];
            slot.unmet = slot.unmet.saturating_sub(1);
            if slot.unmet == 0 && slot.state == NodeState::Pending {
                slot.state = NodeState::Ready;
            }
            if let Some(claimed) = state.claim(dep_idx) {
                ready.push(claimed);
            }
        }
        drop(state);

        self.shared.finished.notify_all();

        for (id, task) in ready {
            self.dispatch(id, task);
        }
    }

    /// Block until every node registered at the time of the call has finished.
    ///
    /// Nodes that were never released by `execute()` keep this waiting.
    pub fn wait_all(&self) {
        let mut state = self.lock();
        let waiting: Vec<NodeId> = state.index.keys().copied().collect();
        while !waiting.iter().all(|id| state.is_finished(*id)) {
            state = self
                .shared
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until one node has finished.
    ///
    /// Returns its outcome, or `None` if it was already pruned.
    pub fn wait_for(&self, id: NodeId) -> Result<Option<NodeOutcome>> {
        let mut state = self.lock();
        if id.0 >= state.next_id {
            return Err(Error::UnknownNode(id));
        }
        while !state.is_finished(id) {
            state = self
                .shared
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(state.slot(id).and_then(|slot| slot.outcome.clone()))
    }

    /// Remove finished nodes from the graph. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut state = self.lock();
        let finished: Vec<(NodeId, NodeIndex)> = state
            .index
            .iter()
            .filter(|(_, idx)| state.graph[**idx].state == NodeState::Finished)
            .map(|(id, idx)| (*id, *idx))
            .collect();

        for (id, idx) in &finished {
            state.graph.remove_node(*idx);
            state.index.remove(id);
        }

        if !finished.is_empty() {
            tracing::debug!("Pruned {} finished nodes", finished.len());
        }
        finished.len()
    }

    /// Remove one node if it has finished. Returns whether it was removed.
    pub fn prune(&self, id: NodeId) -> bool {
        let mut state = self.lock();
        let Some(&idx) = state.index.get(&id) else {
            return false;
        };
        if state.graph[idx].state != NodeState::Finished {
            return false;
        }
        state.graph.remove_node(idx);
        state.index.remove(&id);
        true
    }

    /// Current state of a node, `None` if unknown or pruned.
    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.lock().slot(id).map(|slot| slot.state)
    }

    /// Outcome of a finished node still in the graph.
    pub fn outcome(&self, id: NodeId) -> Option<NodeOutcome> {
        self.lock().slot(id).and_then(|slot| slot.outcome.clone())
    }

    /// Label of a node still in the graph.
    pub fn label(&self, id: NodeId) -> Option<String> {
        self.lock().slot(id).map(|slot| slot.label.clone())
    }

    /// Number of nodes currently in the graph.
    pub fn len(&self) -> usize {
        self.lock().graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.shared.pool.current_num_threads()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers())
            .field("nodes", &self.len())
            .finish()
    }
}
