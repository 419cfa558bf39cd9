//! Terminal display for the geobatch CLI.
//!
//! Progress lines, the run header, the final summary and the failure list.
//! Uses only the `console` crate.

use console::{style, Term};
use geobatch_lib::{FailureKind, FailureRecord, Progress, RunConfig, RunReport};
use std::collections::BTreeMap;
use std::time::Duration;

// ── Header ───────────────────────────────────────────────────────────────────

/// Print what the run is about to do.
pub fn print_header(config: &RunConfig, already_resolved: usize, pending: usize) {
    println!(
        "{} {} already resolved, {} to resolve ({} in flight, checkpoint every {} windows)",
        style("geobatch").cyan().bold(),
        style(already_resolved).bold(),
        style(pending).bold(),
        config.concurrency,
        config.checkpoint_every,
    );
    println!(
        "  {} {}",
        style("provider").dim(),
        style(&config.base_url).dim()
    );
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// One line per completed window: `processed / total`, cumulative errors.
///
/// On a terminal the line is rewritten in place; otherwise every window gets
/// its own line so logs stay readable.
pub fn print_progress(term: &Term, progress: &Progress) {
    let errors = if progress.errors > 0 {
        style(progress.errors).red().to_string()
    } else {
        style(progress.errors).green().to_string()
    };
    let line = format!(
        "Requests done: {} / {}  Errors: {}",
        progress.processed, progress.total, errors
    );

    if term.is_term() {
        let _ = term.clear_line();
        let _ = term.write_str(&line);
        if progress.window == progress.total_windows {
            let _ = term.write_line("");
        }
    } else {
        let _ = term.write_line(&line);
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

pub fn print_summary(report: &RunReport, duration: Duration) {
    println!(
        "{} {} processed in {:.1}s: {} resolved, {} failed, {} total in store",
        style("Summary:").bold(),
        report.processed,
        duration.as_secs_f64(),
        style(report.newly_resolved).green(),
        style(report.errors.len()).red(),
        report.resolved.len(),
    );
    if !report.errors.is_empty() {
        let counts: BTreeMap<String, usize> = report
            .error_counts()
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect();
        let breakdown: Vec<String> = counts
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind, count))
            .collect();
        println!("  {}", style(breakdown.join("  ")).dim());
    }
    if report.checkpoint_failures > 0 {
        println!(
            "{} {} checkpoint write(s) failed",
            style("!").yellow().bold(),
            report.checkpoint_failures
        );
    }
}

/// Print every failed key with its failure kind, grouped by kind.
pub fn print_error_summary(errors: &[FailureRecord], verbose: bool) {
    if errors.is_empty() {
        return;
    }

    let mut by_kind: BTreeMap<String, Vec<&FailureRecord>> = BTreeMap::new();
    for record in errors {
        by_kind.entry(record.kind().to_string()).or_default().push(record);
    }

    println!();
    println!("{}", style("Failed locations:").yellow().bold());
    for (kind, records) in by_kind {
        println!("  {} ({})", style(&kind).bold(), records.len());
        for record in records {
            if verbose || record.kind() != FailureKind::EmptyResult {
                println!("    {}\t{}", record.key, style(&record.failure).dim());
            } else {
                println!("    {}", record.key);
            }
        }
    }
}
