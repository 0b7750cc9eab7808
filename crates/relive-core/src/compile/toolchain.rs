//! Toolchain discovery for script compilation.
//!
//! Locates the compiler executable for a [`CompilerFlavor`] and reports
//! its version.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

use super::types::{CompilerConfig, CompilerFlavor};

/// A located compiler executable.
#[derive(Debug, Clone)]
pub struct ToolchainManager {
    /// Toolchain family
    flavor: CompilerFlavor,

    /// Path to the compiler driver
    program: PathBuf,

    /// Toolchain version string
    version: String,
}

impl ToolchainManager {
    /// Detect the toolchain described by `config`.
    ///
    /// An explicit `config.program` wins over PATH lookup.
    pub fn new(config: &CompilerConfig) -> Result<Self> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => Self::find_program(config.flavor)?,
        };
        Self::with_program(config.flavor, program)
    }

    /// Use a specific executable.
    pub fn with_program(flavor: CompilerFlavor, program: impl Into<PathBuf>) -> Result<Self> {
        let program = program.into();
        let version = Self::get_version(&program)?;
        tracing::debug!("Using {} ({})", program.display(), version);
        Ok(Self {
            flavor,
            program,
            version,
        })
    }

    pub fn flavor(&self) -> CompilerFlavor {
        self.flavor
    }

    /// Path of the compiler executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// First line of `<compiler> --version`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Find the compiler on PATH.
    ///
    /// For C++ the `CXX` environment variable is honored first, then
    /// `c++`, `g++` and `clang++` are tried in that order.
    fn find_program(flavor: CompilerFlavor) -> Result<PathBuf> {
        match flavor {
            CompilerFlavor::Rustc => which::which("rustc")
                .map_err(|_| Error::Toolchain("rustc not found in PATH".to_string())),
            CompilerFlavor::Cxx => {
                if let Some(cxx) = std::env::var_os("CXX")
                    && let Ok(path) = which::which(&cxx)
                {
                    return Ok(path);
                }
                ["c++", "g++", "clang++"]
                    .iter()
                    .find_map(|name| which::which(name).ok())
                    .ok_or_else(|| {
                        Error::Toolchain("no C++ compiler (c++, g++, clang++) found in PATH".to_string())
                    })
            }
        }
    }

    /// Get the compiler version string.
    fn get_version(program: &Path) -> Result<String> {
        let output = Command::new(program)
            .arg("--version")
            .output()
            .map_err(|e| Error::Toolchain(format!("failed to run {}: {}", program.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain(format!(
                "{} --version exited with {}",
                program.display(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
