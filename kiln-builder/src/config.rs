//! Builder configuration
//!
//! Runtime settings that are not part of a pipeline file: whether to ignore
//! the cache for a whole run, and an optional per-step timeout. The engine
//! itself is handed to the orchestrator already built.

use std::time::Duration;

/// Builder options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOptions {
    /// Start the run with the cache disabled
    pub no_cache: bool,

    /// Abort a step that runs longer than this
    pub step_timeout: Option<Duration>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from environment variables
    ///
    /// Expected environment variables:
    /// - KILN_NO_CACHE (optional, true/false/1/0, default: false)
    /// - KILN_STEP_TIMEOUT (optional, seconds, default: none)
    pub fn from_env() -> anyhow::Result<Self> {
        let no_cache = match std::env::var("KILN_NO_CACHE") {
            Ok(value) => parse_bool(&value)
                .ok_or_else(|| anyhow::anyhow!("KILN_NO_CACHE must be a boolean, got '{}'", value))?,
            Err(_) => false,
        };

        let step_timeout = match std::env::var("KILN_STEP_TIMEOUT") {
            Ok(value) => Some(Duration::from_secs(value.parse::<u64>().map_err(|_| {
                anyhow::anyhow!("KILN_STEP_TIMEOUT must be a number of seconds, got '{}'", value)
            })?)),
            Err(_) => None,
        };

        Ok(Self {
            no_cache,
            step_timeout,
        })
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Validates the options
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.step_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
