//! Reserved image labels
//!
//! Every image committed by a pipeline carries these labels. They are the
//! only persisted cache state: the next run finds its candidates by filtering
//! on the repo label and reads step index, fingerprint and runtime back.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::config::StepSpec;
use super::fingerprint::ConfigFingerprint;

/// Prefix shared by every reserved label
pub const LABEL_PREFIX: &str = "kiln.";

pub const REPO_LABEL: &str = "kiln.repo";
pub const STEP_LABEL: &str = "kiln.step";
pub const CONFIG_HASH_LABEL: &str = "kiln.config_hash";
pub const CONFIG_LABEL: &str = "kiln.config";
pub const RUNTIME_LABEL: &str = "kiln.runtime";

/// Engine label filter selecting everything produced for `repo`
pub fn repo_filter(repo: &str) -> String {
    format!("{}={}", REPO_LABEL, repo)
}

/// Labels describing one step of one pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StepLabels {
    pub repo: String,
    pub step: usize,
    pub fingerprint: ConfigFingerprint,
    pub config: JsonValue,
}

impl StepLabels {
    pub fn new(repo: impl Into<String>, step: usize, spec: &StepSpec) -> Self {
        Self {
            repo: repo.into(),
            step,
            fingerprint: spec.fingerprint(),
            config: spec.config_json(),
        }
    }

    /// Label map to commit, with the measured runtime in seconds
    pub fn to_map(&self, runtime_seconds: f64) -> BTreeMap<String, String> {
        BTreeMap::from([
            (REPO_LABEL.to_string(), self.repo.clone()),
            (STEP_LABEL.to_string(), self.step.to_string()),
            (
                CONFIG_HASH_LABEL.to_string(),
                self.fingerprint.as_str().to_string(),
            ),
            (CONFIG_LABEL.to_string(), self.config.to_string()),
            (RUNTIME_LABEL.to_string(), format!("{:.3}", runtime_seconds)),
        ])
    }
}
