//! Run command implementation for relive CLI.
//!
//! Compiles, loads and runs each script once.

use std::time::Instant;

use crate::ScriptOptions;
use crate::colors;
use crate::executor::ScriptRunner;
use crate::output::{print_json, print_report};

/// Execute the run command.
pub fn execute(scripts: &[String], options: &ScriptOptions, json: bool) -> anyhow::Result<()> {
    let start = Instant::now();

    let runner = ScriptRunner::new(options)?;
    if !json {
        runner.print_header("Running", scripts);
    }

    let reports = runner.reload_all(scripts);
    let failed = reports.iter().filter(|(_, r)| !r.succeeded()).count();

    if json {
        print_json(&reports)?;
    } else {
        for (script, report) in &reports {
            print_report(script, report);
        }

        println!("{}", "─".repeat(50));
        let color = if failed == 0 { colors::GREEN } else { colors::RED };
        println!(
            "{}Completed{} {} of {} scripts in {:.2}s",
            color,
            colors::RESET,
            reports.len() - failed,
            reports.len(),
            start.elapsed().as_secs_f64()
        );
    }

    if failed > 0 {
        anyhow::bail!("{} of {} scripts failed", failed, reports.len());
    }
    Ok(())
}
