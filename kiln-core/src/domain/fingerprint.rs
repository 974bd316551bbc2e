//! Config fingerprints
//!
//! The primary cache key of a step: a SHA-256 digest over the canonical JSON
//! of the step configuration. `serde_json` maps keep their keys sorted, so two
//! semantically identical steps always serialize to the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::config::StepSpec;

/// Version of the fingerprint input layout, hashed along with the config
pub const FINGERPRINT_SCHEME: u32 = 1;

/// Deterministic digest identifying a step's configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    /// Computes the fingerprint of a step
    pub fn of(spec: &StepSpec) -> Self {
        let input = json!({
            "scheme": FINGERPRINT_SCHEME,
            "step": spec.config_json(),
        });

        let digest = Sha256::digest(input.to_string().as_bytes());
        Self(hex::encode(digest))
    }

    /// Wraps a fingerprint read back from an image label
    pub fn from_label(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StepSpec {
    /// Shorthand for [`ConfigFingerprint::of`]
    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint::of(self)
    }
}
