//! Common types for the compilation pipeline.

use std::path::PathBuf;
use std::time::Duration;

use super::errors::Diagnostic;

/// Which family of toolchain builds the scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilerFlavor {
    /// `rustc`, producing a `cdylib`.
    #[default]
    Rustc,
    /// A GCC-compatible C++ driver (`g++`, `clang++`), producing a shared object.
    Cxx,
}

impl CompilerFlavor {
    /// Default source file extension for this flavor.
    pub fn source_extension(&self) -> &'static str {
        match self {
            Self::Rustc => "rs",
            Self::Cxx => "cpp",
        }
    }

    /// Default language standard: a Rust edition or a C++ `-std` value.
    pub fn default_standard(&self) -> &'static str {
        match self {
            Self::Rustc => "2021",
            Self::Cxx => "c++20",
        }
    }
}

impl std::str::FromStr for CompilerFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rustc" | "rust" => Ok(Self::Rustc),
            "cxx" | "c++" | "cpp" => Ok(Self::Cxx),
            other => Err(format!("unknown compiler flavor '{}' (expected rustc or cxx)", other)),
        }
    }
}

/// Configuration for the compiler.
///
/// For a given config the argument list is fixed; nothing is derived from
/// the source file other than its path and crate name.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Toolchain family
    pub flavor: CompilerFlavor,

    /// Explicit compiler executable. If None, it is looked up on PATH.
    pub program: Option<PathBuf>,

    /// Rust edition or C++ standard
    pub standard: String,

    /// Optimization level (0-3)
    pub opt_level: u8,

    /// Emit debug info
    pub debug_info: bool,

    /// Library (rustc `-L`) or include (C++ `-I`) search paths
    pub include_dirs: Vec<PathBuf>,

    /// Additional flags appended before the input path
    pub extra_flags: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl CompilerConfig {
    /// Fast builds for the edit-reload loop.
    pub fn development() -> Self {
        Self::for_flavor(CompilerFlavor::Rustc)
    }

    /// Optimized builds without debug info.
    pub fn release() -> Self {
        Self {
            opt_level: 3,
            debug_info: false,
            ..Self::development()
        }
    }

    /// Development defaults for a toolchain family.
    pub fn for_flavor(flavor: CompilerFlavor) -> Self {
        Self {
            flavor,
            program: None,
            standard: flavor.default_standard().to_string(),
            opt_level: 0,
            debug_info: true,
            include_dirs: Vec::new(),
            extra_flags: Vec::new(),
        }
    }
}

/// Successful compile.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Path of the produced module
    pub module_path: PathBuf,

    /// Non-fatal diagnostics (warnings, notes)
    pub warnings: Vec<Diagnostic>,

    /// Wall time of the compiler process
    pub elapsed: Duration,
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}
