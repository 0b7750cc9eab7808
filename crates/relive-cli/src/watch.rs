//! Watch command implementation for relive CLI.
//!
//! Runs the scripts once, then reloads a script every time its source
//! file changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use relive_core::{HostConfig, Report, script_name_for};
use tokio::sync::mpsc;

use crate::ScriptOptions;
use crate::colors;
use crate::executor::ScriptRunner;
use crate::output::{print_json_line, print_report};

/// Watches the scripts directory and yields names of changed scripts.
pub struct ScriptWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ScriptWatcher {
    /// Watch `config.scripts_dir` for changes to any of `scripts`.
    pub fn new(config: &HostConfig, scripts: &[String]) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter_config = config.clone();
        let wanted: BTreeSet<String> = scripts.iter().cloned().collect();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths = events.iter().map(|event| event.path.as_path());
                    for script in changed_scripts(&filter_config, &wanted, paths) {
                        let _ = tx.send(script);
                    }
                }
                Err(e) => tracing::warn!("Watch error: {:?}", e),
            },
        )
        .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&config.scripts_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                anyhow::anyhow!("Failed to watch {}: {}", config.scripts_dir.display(), e)
            })?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next changed script name.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Watched scripts whose source is among `paths` and still exists.
fn changed_scripts<'a>(
    config: &HostConfig,
    wanted: &BTreeSet<String>,
    paths: impl IntoIterator<Item = &'a Path>,
) -> BTreeSet<String> {
    paths
        .into_iter()
        .filter(|path| path.exists())
        .filter_map(|path| script_name_for(config, path))
        .filter(|script| wanted.contains(script))
        .collect()
}

/// Execute the watch command.
pub async fn execute(scripts: Vec<String>, options: ScriptOptions, json: bool) -> anyhow::Result<()> {
    let runner = Arc::new(ScriptRunner::new(&options)?);
    if !json {
        runner.print_header("Watching", &scripts);
    }

    // Watch before the first build so edits saved meanwhile are queued.
    let mut watcher = ScriptWatcher::new(runner.host().config(), &scripts)?;

    let initial = {
        let runner = Arc::clone(&runner);
        let scripts = scripts.clone();
        tokio::task::spawn_blocking(move || runner.reload_all(&scripts)).await?
    };
    for (script, report) in &initial {
        show(script, report, json)?;
    }

    let scripts_dir: PathBuf = runner.host().config().scripts_dir.clone();
    if !json {
        print_waiting(&scripts_dir);
    }

    loop {
        tokio::select! {
            changed = watcher.recv() => {
                let Some(script) = changed else {
                    break;
                };
                if !json {
                    println!(
                        "\n{}{} changed, reloading...{}",
                        colors::YELLOW,
                        script,
                        colors::RESET
                    );
                }

                let reload_runner = Arc::clone(&runner);
                let name = script.clone();
                let report = tokio::task::spawn_blocking(move || reload_runner.reload(&name)).await?;
                show(&script, &report, json)?;

                if !json {
                    print_waiting(&scripts_dir);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    runner.host().unload_all();
    if !json {
        println!("\n{}Stopped watching.{}", colors::DIM, colors::RESET);
    }
    Ok(())
}

fn show(script: &str, report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        print_json_line(script, report)
    } else {
        print_report(script, report);
        Ok(())
    }
}

fn print_waiting(scripts_dir: &Path) {
    println!(
        "\n{}Watching {} for changes... (Ctrl+C to stop){}",
        colors::DIM,
        scripts_dir.display(),
        colors::RESET
    );
}
