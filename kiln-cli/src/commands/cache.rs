//! Cache command handler

use anyhow::Result;
use colored::*;
use std::path::Path;

use super::open_orchestrator;
use crate::config::Config;

/// List the cached images of a pipeline without changing anything
pub async fn handle_cache(config: &Config, file: &Path) -> Result<()> {
    let orchestrator = open_orchestrator(config, file).await?;
    let records = orchestrator.cache_listing().await?;
    let pipeline = orchestrator.pipeline();

    if records.is_empty() {
        println!(
            "{}",
            format!("No cached images for '{}'.", pipeline.repo).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} cached image(s) for '{}':", records.len(), pipeline.repo).bold()
    );
    println!();

    for record in &records {
        let current = pipeline
            .steps
            .get(record.step_index)
            .is_some_and(|spec| spec.fingerprint() == record.config_fingerprint);
        let state = if current {
            "current".green()
        } else {
            "stale".yellow()
        };

        println!(
            "  {} Step {:<3} {}  {}  {:>8.2}s  {}  {}",
            "▸".cyan(),
            record.step_index,
            record.id.short(),
            record.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.runtime_seconds,
            record.config_fingerprint.short().dimmed(),
            state
        );
    }

    Ok(())
}
