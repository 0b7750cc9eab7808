//! relive CLI - rebuild and hot-swap native scripts.

mod colors;
mod executor;
mod output;
mod run;
mod toolchain;
mod watch;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relive_core::CompilerFlavor;

#[derive(Parser)]
#[command(name = "relive")]
#[command(about = "Rebuild and hot-swap native scripts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile, load and run scripts once
    Run {
        /// Script names (file stems inside the scripts directory)
        #[arg(required = true)]
        scripts: Vec<String>,

        #[command(flatten)]
        options: ScriptOptions,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run scripts, then reload each one whenever its source changes
    Watch {
        /// Script names (file stems inside the scripts directory)
        #[arg(required = true)]
        scripts: Vec<String>,

        #[command(flatten)]
        options: ScriptOptions,

        /// Print reports as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the compiler that would be used
    Toolchain {
        /// Toolchain family (rustc or cxx)
        #[arg(long, default_value = "rustc")]
        flavor: CompilerFlavor,

        /// Compiler executable to use instead of searching PATH
        #[arg(long)]
        compiler: Option<PathBuf>,
    },

    /// Remove shadow copies left in the scripts directory
    Clean {
        /// Directory holding the scripts
        #[arg(long, default_value = "src/scripts")]
        scripts_dir: PathBuf,
    },
}

/// Options shared by every command that reloads scripts.
#[derive(Args, Debug, Clone)]
pub struct ScriptOptions {
    /// Directory holding the scripts
    #[arg(long, default_value = "src/scripts")]
    pub scripts_dir: PathBuf,

    /// Toolchain family (rustc or cxx)
    #[arg(long, default_value = "rustc")]
    pub flavor: CompilerFlavor,

    /// Compiler executable to use instead of searching PATH
    #[arg(long)]
    pub compiler: Option<PathBuf>,

    /// Optimization level passed to the compiler (0-3)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub opt_level: Option<u8>,

    /// Build without debug info, at opt-level 3 unless given
    #[arg(long)]
    pub release: bool,

    /// Extra library (rustc) or include (C++) search directory
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include_dirs: Vec<PathBuf>,

    /// Worker threads for the scheduler (default: available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format relive-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(relive_err) = err.downcast_ref::<relive_core::Error>() {
            anyhow::anyhow!("{}", relive_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            scripts,
            options,
            json,
        } => {
            run::execute(&scripts, &options, json).map_err(format_error)?;
        }

        Commands::Watch {
            scripts,
            options,
            json,
        } => {
            watch::execute(scripts, options, json).await.map_err(format_error)?;
        }

        Commands::Toolchain { flavor, compiler } => {
            toolchain::execute(flavor, compiler).map_err(format_error)?;
        }

        Commands::Clean { scripts_dir } => {
            let dirs = relive_core::ScriptDirs::new(&scripts_dir);
            dirs.clean().map_err(|e| format_error(e.into()))?;
            println!("Cleaned {}", dirs.relive_dir.display());
        }
    }

    Ok(())
}
