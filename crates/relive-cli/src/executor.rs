//! Shared reload pipeline for the CLI.
//!
//! `run` and `watch` both build a [`ScriptRunner`] from the command-line
//! options and go through it for every reload.

use std::sync::Arc;

use relive_core::{HostConfig, Report, Scheduler, SchedulerConfig, ScriptHost};

use crate::ScriptOptions;
use crate::colors;

/// A script host plus the scheduler its reloads run on.
pub struct ScriptRunner {
    host: ScriptHost,
    scheduler: Scheduler,
}

impl ScriptRunner {
    /// Detect the toolchain and start the worker pool.
    pub fn new(options: &ScriptOptions) -> anyhow::Result<Self> {
        let host = ScriptHost::new(host_config(options))?;
        let scheduler = Scheduler::new(scheduler_config(options))?;
        Ok(Self { host, scheduler })
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// Print the command header.
    pub fn print_header(&self, action: &str, scripts: &[String]) {
        println!(
            "\n{}{}{} {}{}{} {}({}){}",
            colors::BOLD,
            action,
            colors::RESET,
            colors::CYAN,
            scripts.join(", "),
            colors::RESET,
            colors::DIM,
            self.host.config().scripts_dir.display(),
            colors::RESET
        );
        println!("{}", "─".repeat(50));
    }

    /// Reload every script in one graph execution.
    pub fn reload_all(&self, scripts: &[String]) -> Vec<(String, Arc<Report>)> {
        self.host.reload_many(scripts, &self.scheduler)
    }

    /// Reload one script.
    pub fn reload(&self, script: &str) -> Arc<Report> {
        let report = Arc::new(Report::new());
        self.host
            .load_or_reload_script(script, &self.scheduler, Some(Arc::clone(&report)));
        report
    }
}

/// Host configuration for the given options.
pub fn host_config(options: &ScriptOptions) -> HostConfig {
    let mut config = HostConfig::for_scripts_dir(&options.scripts_dir).with_flavor(options.flavor);

    if options.release {
        config.compiler.opt_level = 3;
        config.compiler.debug_info = false;
    }
    if let Some(level) = options.opt_level {
        config.compiler.opt_level = level;
    }
    config.compiler.program = options.compiler.clone();
    config.compiler.include_dirs = options.include_dirs.clone();
    config
}

fn scheduler_config(options: &ScriptOptions) -> SchedulerConfig {
    match options.workers {
        Some(workers) => SchedulerConfig::with_workers(workers),
        None => SchedulerConfig::default(),
    }
}
