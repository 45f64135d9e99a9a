//! End of run console report.
//!
//! ```text
//! +++ ========== Buildkite Test Engine Report  ==========
//! ✅ All tests passed.
//!
//!   Passed on first run   12
//!   Passed on retry        1
//!   ...
//!   Total                 14
//!
//! +++ Muted Tests:
//! - Fruit is ripe (failed)
//! ===================================================
//! ```

use std::io::{self, Write};

use console::style;

use crate::executor::{RunResult, RunStatus};
use crate::plan::TestCase;

/// Prints the report for `result` to stdout.
///
/// `skipped_by_engine` lists the tests the planning service left out of
/// the plan.
pub fn print_report(result: &RunResult, skipped_by_engine: &[TestCase], runner_name: &str) {
    let stdout = io::stdout();
    if let Err(e) = write_report(&mut stdout.lock(), result, skipped_by_engine, runner_name) {
        tracing::warn!("Failed to print report: {}", e);
    }
}

pub fn write_report<W: Write>(
    out: &mut W,
    result: &RunResult,
    skipped_by_engine: &[TestCase],
    runner_name: &str,
) -> io::Result<()> {
    writeln!(out, "+++ ========== Buildkite Test Engine Report  ==========")?;

    match result.status() {
        RunStatus::Passed => writeln!(out, "{}", style("✅ All tests passed.").green().bold())?,
        RunStatus::Failed => writeln!(out, "{}", style("❌ Some tests failed.").red().bold())?,
        RunStatus::Error => writeln!(
            out,
            "{}",
            style(format!("🚨 {}", result.error().unwrap_or_default()))
                .red()
                .bold()
        )?,
        RunStatus::Unknown => {}
    }
    writeln!(out)?;

    let stats = result.statistics();
    for (label, count) in [
        ("Passed on first run", stats.passed_on_first_run),
        ("Passed on retry", stats.passed_on_retry),
        ("Muted passed", stats.muted_passed),
        ("Muted failed", stats.muted_failed),
        ("Failed", stats.failed),
        ("Skipped", stats.skipped),
    ] {
        writeln!(out, "  {:<20} {:>5}", label, count)?;
    }
    writeln!(out, "  {:<20} {:>5}", style("Total").bold(), stats.total)?;

    let muted = result.muted_tests();
    if !muted.is_empty() {
        writeln!(out)?;
        writeln!(out, "+++ Muted Tests:")?;
        for outcome in muted {
            writeln!(
                out,
                "- {} {} ({})",
                outcome.test_case.scope,
                outcome.test_case.name,
                style(outcome.status).dim()
            )?;
        }
    }

    let failed = result.failed_tests();
    if !failed.is_empty() {
        writeln!(out)?;
        writeln!(out, "+++ {}", style("Failed Tests:").red())?;
        write_cases(out, &failed)?;
    }

    let skipped = result.skipped_tests();
    if !skipped.is_empty() {
        writeln!(out)?;
        writeln!(out, "+++ Skipped by {}:", runner_name)?;
        write_cases(out, &skipped)?;
    }

    if !skipped_by_engine.is_empty() {
        writeln!(out)?;
        writeln!(out, "+++ Skipped by Test Engine:")?;
        write_cases(out, skipped_by_engine)?;
    }

    writeln!(out, "===================================================")
}

fn write_cases<W: Write>(out: &mut W, cases: &[TestCase]) -> io::Result<()> {
    for case in cases {
        writeln!(out, "- {} {}", case.scope, case.name)?;
    }
    Ok(())
}
