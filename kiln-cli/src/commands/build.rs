//! Build command handler

use anyhow::Result;
use colored::*;
use kiln_builder::{BuildReport, Orchestrator};
use kiln_engine::NullSink;
use std::path::Path;

use super::prepare;
use crate::config::Config;
use crate::progress::ConsoleProgress;

/// Build a pipeline and print its report
///
/// # Arguments
/// * `config` - The CLI configuration
/// * `file` - Pipeline file
/// * `no_cache` - Run every step regardless of the cache
/// * `step_timeout` - Per-step timeout in seconds
/// * `json` - Print the report as JSON instead of text
pub async fn handle_build(
    config: &Config,
    file: &Path,
    no_cache: bool,
    step_timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let options = config.build_options(no_cache, step_timeout)?;
    let (pipeline, engine) = prepare(config, file).await?;
    let orchestrator = Orchestrator::new(engine, pipeline, options);

    if json {
        let report = orchestrator.build(&mut NullSink).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("Building '{}'", orchestrator.pipeline().repo).bold()
    );
    let report = orchestrator.build(&mut ConsoleProgress::new()).await?;
    print_report(&report);

    Ok(())
}

/// Print a build report
fn print_report(report: &BuildReport) {
    println!();
    for step in &report.steps {
        let status = if step.cache_hit {
            "cached".green()
        } else {
            "built".cyan()
        };
        println!(
            "  {} Step {} {:<8} {} {}",
            "▸".cyan(),
            step.index,
            step.kind,
            status,
            step.image_id.short().dimmed()
        );
    }

    if !report.removed.is_empty() {
        println!(
            "  {}",
            format!("Removed {} unused image(s)", report.removed.len()).dimmed()
        );
    }

    println!();
    println!("{} {}", "✓ Built".green().bold(), report.image);
    println!("  Elapsed:    {:.2}s", report.elapsed_seconds);
    println!(
        "  Cache hits: {}/{} ({:.2}s saved)",
        report.cache_hits(),
        report.steps.len(),
        report.time_saved()
    );
    println!("  Run:        {}", report.run_id.to_string().dimmed());
}
