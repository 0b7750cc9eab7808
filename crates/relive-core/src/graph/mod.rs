//! Task graph scheduler.
//!
//! This module provides:
//! - Labelled nodes wrapping single-shot units of work
//! - Dependency edges with finish-before-start ordering
//! - A worker pool that runs independent nodes in parallel
//!
//! # Node lifecycle
//!
//! ```text
//! add_node ──► Pending ──(deps finished)──► Ready ──(execute)──► Running ──► Finished
//!                                                                              │
//!                                                                   prune_finished
//! ```

mod scheduler;
mod types;

pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::{Node, NodeId, NodeOutcome, NodeState, Task};
pub(crate) use types::panic_message;
