//! Clean command handler

use anyhow::Result;
use colored::*;
use std::path::Path;

use super::open_orchestrator;
use crate::config::Config;

/// Remove every container and image labeled with the pipeline's repo
pub async fn handle_clean(config: &Config, file: &Path) -> Result<()> {
    let orchestrator = open_orchestrator(config, file).await?;
    let report = orchestrator.clean().await?;

    if report.containers_removed.is_empty() && report.images_removed.is_empty() {
        println!(
            "{}",
            format!("Nothing to clean for '{}'.", orchestrator.pipeline().repo).yellow()
        );
        return Ok(());
    }

    for container in &report.containers_removed {
        println!("  {} container {}", "✗".red(), container.dimmed());
    }
    for image in &report.images_removed {
        println!("  {} image {}", "✗".red(), image.short().dimmed());
    }

    println!(
        "{}",
        format!(
            "✓ Removed {} container(s) and {} image(s)",
            report.containers_removed.len(),
            report.images_removed.len()
        )
        .green()
    );
    Ok(())
}
