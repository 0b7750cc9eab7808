//! Toolchain command implementation for relive CLI.

use std::path::PathBuf;

use relive_core::{CompilerConfig, CompilerFlavor, ToolchainManager};

use crate::colors;

/// Print the compiler `run` and `watch` would use.
pub fn execute(flavor: CompilerFlavor, compiler: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = CompilerConfig::for_flavor(flavor);
    config.program = compiler;

    let toolchain = ToolchainManager::new(&config)?;
    println!(
        "{}{:?}{} {}",
        colors::BOLD,
        toolchain.flavor(),
        colors::RESET,
        toolchain.program().display()
    );
    println!("{}{}{}", colors::DIM, toolchain.version(), colors::RESET);
    Ok(())
}
