//! Configuration module
//!
//! Settings shared by every command, plus the builder options assembled from
//! the environment and command-line flags.

use anyhow::Result;
use kiln_builder::BuildOptions;
use kiln_engine::CliEngine;
use std::sync::Arc;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Docker-compatible engine binary
    pub engine: String,
}

impl Config {
    /// Engine facade for the configured binary
    pub fn engine(&self) -> Arc<CliEngine> {
        Arc::new(CliEngine::new(&self.engine))
    }

    /// Builder options: environment first, flags on top
    ///
    /// # Arguments
    /// * `no_cache` - `--no-cache` was given
    /// * `step_timeout` - `--step-timeout` in seconds, if given
    pub fn build_options(&self, no_cache: bool, step_timeout: Option<u64>) -> Result<BuildOptions> {
        let mut options = BuildOptions::from_env()?;

        if no_cache {
            options.no_cache = true;
        }
        if let Some(seconds) = step_timeout {
            options.step_timeout = Some(Duration::from_secs(seconds));
        }

        options.validate()?;
        Ok(options)
    }
}
