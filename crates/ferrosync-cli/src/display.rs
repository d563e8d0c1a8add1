//! Human-readable output for the FerroSync CLI

use console::style;
use ferrosync_engine::PropagationReport;
use ferrosync_types::{Outcome, ReconciledItem};
use std::time::Duration;

/// Print the summary of a finished propagation, followed by failed items
pub fn display_report(report: &PropagationReport, items: &[ReconciledItem]) {
    println!();
    println!(
        "{} {}",
        style("📋").blue().bold(),
        style("Propagation Summary").bold().underlined()
    );
    println!("  Run: {}", style(report.run_id).dim());
    println!("  Succeeded: {}", style(report.succeeded).green());
    if report.declined > 0 {
        println!("  Declined merges: {}", style(report.declined).yellow());
    }
    println!("  Skipped: {}", style(report.skipped).yellow());
    println!("  Failed: {}", style(report.failed).red());
    if report.partially_transferred > 0 {
        println!(
            "  Partially transferred: {}",
            style(report.partially_transferred).red()
        );
    }
    if report.not_started > 0 {
        println!("  Not started: {}", style(report.not_started).yellow());
    }
    println!(
        "  Transferred: {}",
        style(format_bytes(report.bytes_transferred)).cyan()
    );
    println!(
        "  Duration: {}",
        style(format_duration(report.duration)).blue()
    );

    let failures: Vec<_> = items
        .iter()
        .filter_map(|item| match item.outcome() {
            Outcome::Failed { reason, .. } => Some((item, reason)),
            _ => None,
        })
        .collect();

    if !failures.is_empty() {
        println!();
        println!("  Failed items:");
        for (item, reason) in failures {
            println!("    • {} {}", style(&item.path).bold(), style(reason).dim());
        }
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Display a warning message
pub fn display_warning(message: &str) {
    println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
}

/// Display a success message
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}

/// Display an info message
pub fn display_info(message: &str) {
    println!("{} {}", style("ℹ").blue().bold(), style(message).blue());
}
