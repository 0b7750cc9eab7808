//! Compilation pipeline for relive scripts.
//!
//! This module provides:
//! - Toolchain discovery (rustc or a C++ driver on PATH)
//! - The script compiler (one source → one dynamic library)
//! - Diagnostic parsing (compiler stderr → structured messages)
//!
//! # Architecture
//!
//! ```text
//! <name>.rs / <name>.cpp
//!     │
//!     └── ToolchainCompiler ──► rustc --crate-type cdylib ... ──► <name>.so
//!               │
//!               └── stderr ──► parse_diagnostics ──► Vec<Diagnostic>
//! ```

mod errors;
mod invoker;
mod toolchain;
mod types;

pub use errors::{
    CompileError, Diagnostic, DiagnosticLevel, SourceLocation, parse_diagnostics,
    parse_gcc_style, parse_rustc_json,
};
pub use invoker::{ScriptCompiler, ToolchainCompiler};
pub use toolchain::ToolchainManager;
pub use types::{CompileOutput, CompilerConfig, CompilerFlavor, dylib_extension};
