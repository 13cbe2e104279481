//! `minitrace summary`: aggregate a coverage file and print it.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use minitrace_config::log_cli_debug;
use minitrace_core::{CoverageLog, CoverageSummary};

pub fn load(path: &Path) -> Result<CoverageSummary> {
    let log = CoverageLog::load(path)
        .with_context(|| format!("Failed to read coverage file {}", path.display()))?;
    log_cli_debug!("Coverage file parsed", entries = log.entries.len());
    Ok(log.aggregate())
}

pub fn render_json(summary: &CoverageSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("Failed to serialize summary")
}

/// Per-class table, optionally with one line per method
pub fn render_table(summary: &CoverageSummary, methods: bool) -> String {
    let width = summary
        .classes
        .iter()
        .map(|c| c.class.len())
        .max()
        .unwrap_or(0)
        .max("CLASS".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Sessions: {}  Dumps: {}",
        summary.starts, summary.dumps
    );
    let _ = writeln!(out, "{:<width$}  {:>13}  {:>7}", "CLASS", "COVERED", "PERCENT");
    for class in &summary.classes {
        let _ = writeln!(
            out,
            "{:<width$}  {:>13}  {:>6.1}%",
            class.class,
            format!("{}/{}", class.covered, class.total),
            class.percent()
        );
        if methods {
            for method in &class.methods {
                let _ = writeln!(
                    out,
                    "  {}{} {}/{}",
                    method.name,
                    method.signature,
                    method.covered(),
                    method.total()
                );
            }
        }
    }

    let (covered, total) = (summary.covered(), summary.total());
    let percent = if total == 0 {
        0.0
    } else {
        covered as f64 * 100.0 / total as f64
    };
    let _ = write!(out, "Total: {covered}/{total} code units ({percent:.1}%)");
    out
}
