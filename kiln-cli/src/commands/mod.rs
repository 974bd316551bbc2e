//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod cache;
mod clean;

use anyhow::{Context, Result};
use clap::Subcommand;
use kiln_builder::{BuildOptions, Orchestrator};
use kiln_core::domain::config::PipelineConfig;
use kiln_engine::CliEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build the pipeline, reusing cached step images
    Build {
        /// Pipeline file
        file: PathBuf,

        /// Ignore the cache and run every step
        #[arg(long)]
        no_cache: bool,

        /// Abort a step running longer than this many seconds
        #[arg(long, value_name = "SECONDS")]
        step_timeout: Option<u64>,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every container and image of the pipeline
    Clean {
        /// Pipeline file
        file: PathBuf,
    },
    /// List the cached images of the pipeline
    Cache {
        /// Pipeline file
        file: PathBuf,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Build {
            file,
            no_cache,
            step_timeout,
            json,
        } => build::handle_build(config, &file, no_cache, step_timeout, json).await,
        Commands::Clean { file } => clean::handle_clean(config, &file).await,
        Commands::Cache { file } => cache::handle_cache(config, &file).await,
    }
}

/// Load a pipeline file and check the engine binary responds
async fn prepare(config: &Config, file: &Path) -> Result<(PipelineConfig, Arc<CliEngine>)> {
    let pipeline = PipelineConfig::from_file(file)
        .with_context(|| format!("Failed to load pipeline {}", file.display()))?;
    debug!(
        "Loaded pipeline '{}' with {} steps",
        pipeline.repo,
        pipeline.steps.len()
    );

    let engine = config.engine();
    engine
        .check_available()
        .await
        .with_context(|| format!("Engine '{}' is not usable", config.engine))?;

    Ok((pipeline, engine))
}

/// Orchestrator for the commands that need no build options
async fn open_orchestrator(config: &Config, file: &Path) -> Result<Orchestrator> {
    let (pipeline, engine) = prepare(config, file).await?;
    let options = BuildOptions::new();
    Ok(Orchestrator::new(engine, pipeline, options))
}
