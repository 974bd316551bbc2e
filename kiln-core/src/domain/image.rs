//! Image record domain types
//!
//! An [`ImageRecord`] is an immutable snapshot of an engine image annotated
//! with the pipeline labels used for cache bookkeeping. Records are built from
//! one of two engine descriptor shapes: an image listing entry (previous runs,
//! marked as cache candidates) or an inspection right after a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use super::fingerprint::ConfigFingerprint;
use super::labels::{
    CONFIG_HASH_LABEL, CONFIG_LABEL, LABEL_PREFIX, REPO_LABEL, RUNTIME_LABEL, STEP_LABEL,
};
use crate::dto::image::{ImageInspect, ImageSummary, parse_created};
use crate::error::RecordError;

/// Content identity of an engine image: exactly 64 hex characters
///
/// An optional `sha256:` prefix is accepted and stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        let digest = raw.trim().strip_prefix("sha256:").unwrap_or(raw.trim());

        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RecordError::InvalidId(raw.to_string()));
        }

        Ok(Self(digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12 character short form engines print
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for ImageId {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pipeline image, committed in this run or found from a previous one
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub created_at: DateTime<Utc>,
    pub step_index: usize,
    pub config_fingerprint: ConfigFingerprint,
    /// Runtime of the step that produced this image, as measured then
    pub runtime_seconds: f64,
    /// Loaded from a previous run rather than produced by this one
    pub is_cache_candidate: bool,
    /// Step configuration stored alongside the fingerprint, if readable
    pub config: Option<JsonValue>,
    /// Remaining reserved labels, the repo label among them
    pub extra_labels: BTreeMap<String, String>,
}

impl ImageRecord {
    /// Builds a cache candidate from an image listing entry
    pub fn from_summary(summary: &ImageSummary) -> Result<Self, RecordError> {
        let id = ImageId::parse(&summary.id)?;
        let created_at = DateTime::from_timestamp(summary.created, 0)
            .ok_or_else(|| RecordError::InvalidTimestamp(summary.created.to_string()))?;

        Self::from_labels(id, created_at, &summary.labels(), true)
    }

    /// Builds a fresh record from the inspection of a just committed image
    pub fn from_inspect(inspect: &ImageInspect) -> Result<Self, RecordError> {
        let id = ImageId::parse(&inspect.id)?;
        let created_at = parse_created(&inspect.created)?;

        Self::from_labels(id, created_at, &inspect.labels(), false)
    }

    fn from_labels(
        id: ImageId,
        created_at: DateTime<Utc>,
        labels: &BTreeMap<String, String>,
        is_cache_candidate: bool,
    ) -> Result<Self, RecordError> {
        let required = |label: &str| {
            labels
                .get(label)
                .ok_or_else(|| RecordError::MissingLabel {
                    image: id.to_string(),
                    label: label.to_string(),
                })
        };
        let invalid = |label: &str, value: &str| RecordError::InvalidLabel {
            image: id.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        };

        let step_raw = required(STEP_LABEL)?;
        let step_index = step_raw
            .parse::<usize>()
            .map_err(|_| invalid(STEP_LABEL, step_raw))?;

        let config_fingerprint = ConfigFingerprint::from_label(required(CONFIG_HASH_LABEL)?.clone());

        let runtime_seconds = match labels.get(RUNTIME_LABEL) {
            Some(raw) => match raw.parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => value,
                _ => return Err(invalid(RUNTIME_LABEL, raw)),
            },
            None => 0.0,
        };

        let config = labels
            .get(CONFIG_LABEL)
            .and_then(|raw| serde_json::from_str(raw).ok());

        let extra_labels = labels
            .iter()
            .filter(|(key, _)| key.starts_with(LABEL_PREFIX))
            .filter(|(key, _)| {
                ![STEP_LABEL, CONFIG_HASH_LABEL, CONFIG_LABEL, RUNTIME_LABEL]
                    .contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id,
            created_at,
            step_index,
            config_fingerprint,
            runtime_seconds,
            is_cache_candidate,
            config,
            extra_labels,
        })
    }

    /// Repo label this image was committed with
    pub fn repo(&self) -> Option<&str> {
        self.extra_labels.get(REPO_LABEL).map(String::as_str)
    }
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageRecord {}

impl Hash for ImageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Image {}>", self.id.short())
    }
}
