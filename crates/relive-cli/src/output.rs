//! Report printing.

use std::sync::Arc;

use relive_core::{Report, Severity};
use serde_json::json;

use crate::colors;

/// Furthest stage a reload attempt reached.
pub fn last_stage(report: &Report) -> &'static str {
    if report.executed() {
        "executed"
    } else if report.loaded() {
        "loaded"
    } else if report.compiled() {
        "compiled"
    } else if report.scheduled() {
        "scheduled"
    } else {
        "not scheduled"
    }
}

/// Print one report for a human reader.
pub fn print_report(script: &str, report: &Report) {
    if report.succeeded() {
        println!(
            "{}✓{} {}{}{} {}",
            colors::GREEN,
            colors::RESET,
            colors::BOLD,
            script,
            colors::RESET,
            last_stage(report)
        );
    } else {
        println!(
            "{}✗{} {}{}{} failed after: {}",
            colors::RED,
            colors::RESET,
            colors::BOLD,
            script,
            colors::RESET,
            last_stage(report)
        );
    }

    for entry in report.entries() {
        match entry.severity {
            Severity::Info => println!("    {}{}{}", colors::DIM, entry.message, colors::RESET),
            Severity::Error => println!("    {}{}{}", colors::RED, entry.message, colors::RESET),
        }
    }
}

/// JSON form of one report.
pub fn report_json(script: &str, report: &Report) -> serde_json::Value {
    json!({
        "script": script,
        "report": report.snapshot(),
    })
}

/// Print all reports as one JSON array.
pub fn print_json(reports: &[(String, Arc<Report>)]) -> anyhow::Result<()> {
    let values: Vec<serde_json::Value> = reports
        .iter()
        .map(|(script, report)| report_json(script, report))
        .collect();
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

/// Print one report as a single JSON line.
pub fn print_json_line(script: &str, report: &Report) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&report_json(script, report))?);
    Ok(())
}
