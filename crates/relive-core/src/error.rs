//! Error types for relive-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::compile::CompileError;
use crate::graph::NodeId;
use crate::loader::LoadError;

/// Result type for relive-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relive-core.
///
/// The reload pipeline never returns these to its caller; each one is
/// turned into a report entry at the stage where it happened.
#[derive(Debug, Error)]
pub enum Error {
    /// The script source file does not exist.
    #[error("source file missing: {} not found", path.display())]
    MissingSource { path: PathBuf },

    /// The external toolchain rejected the script.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The compiler reported success but produced no module.
    #[error("compiled module missing: {} not found after build", path.display())]
    MissingOutputArtifact { path: PathBuf },

    /// The module could not be opened, or lacks the entry symbol.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The script's entry point panicked or threw.
    #[error("script '{script}' faulted: {message}")]
    EntryRuntime { script: String, message: String },

    /// Submitting or running the reload node failed.
    #[error("scheduling failed: {0}")]
    Scheduling(String),

    /// A dependency refers to a node id that was never issued.
    #[error("unknown graph node: {0}")]
    UnknownNode(NodeId),

    /// Toolchain lookup error.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short recovery hint shown next to the error by the CLI.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingSource { .. } => {
                Some("check the script name and the --scripts-dir option")
            }
            Self::Compile(CompileError::Spawn { .. }) | Self::Toolchain(_) => {
                Some("make sure the compiler is installed and on PATH, or pass --compiler")
            }
            Self::Compile(_) => Some("fix the reported compiler errors and save the file again"),
            Self::Load(LoadError::MissingSymbol { .. }) => Some(
                "export `#[no_mangle] pub extern \"C-unwind\" fn relive_script_main(_: *const c_void)`",
            ),
            _ => None,
        }
    }

    /// Render the error followed by its hint, if any.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
