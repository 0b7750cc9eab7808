//! Core engine for relive, a live script hot-reload pipeline.
//!
//! This crate provides:
//! - Compiler invocation (one script source → one dynamic library)
//! - Module loading with shadow copies
//! - A dependency-graph scheduler backed by a worker pool
//! - Thread-safe, multi-stage reload reports
//! - The reload orchestrator tying them together ([`ScriptHost`])

pub mod compile;
pub mod error;
pub mod graph;
pub mod loader;
pub mod paths;
pub mod reload;
pub mod report;

pub use compile::{
    CompileError, CompilerConfig, CompilerFlavor, Diagnostic, DiagnosticLevel, ScriptCompiler,
    ToolchainCompiler, ToolchainManager,
};
pub use error::{Error, Result};
pub use graph::{Node, NodeId, NodeOutcome, NodeState, Scheduler, SchedulerConfig};
pub use loader::{
    ENTRY_SYMBOL, GuardedEntryFn, LibraryLoader, LoadError, ModuleHandle, ModuleLoader,
    ScriptEntryFn, ShadowMode, guard_symbol,
};
pub use paths::ScriptDirs;
pub use reload::{HostConfig, ScriptHost, ScriptPaths, script_name_for};
pub use report::{Report, ReportEntry, ReportSnapshot, Severity};
