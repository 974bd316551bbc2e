//! Engine image descriptors

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RecordError;

/// Image as reported by an engine's image listing
///
/// `Created` is a unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Created", default)]
    pub created: i64,
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Image as reported by an engine's image inspection
///
/// `Created` is an RFC 3339 string, usually with fractional seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "Config", default)]
    pub config: Option<InspectConfig>,
}

/// The `Config` section of an inspected image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectConfig {
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
}

impl ImageSummary {
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone().unwrap_or_default()
    }
}

impl ImageInspect {
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default()
    }

    /// Reshapes an inspection into a listing entry
    ///
    /// Used by engines whose listing output does not carry labels.
    pub fn to_summary(&self) -> Result<ImageSummary, RecordError> {
        Ok(ImageSummary {
            id: self.id.clone(),
            created: parse_created(&self.created)?.timestamp(),
            labels: Some(self.labels()),
        })
    }
}

/// Parses an engine creation timestamp, dropping fractional seconds
///
/// Accepts RFC 3339 with any offset, and falls back to the bare
/// `%Y-%m-%dT%H:%M:%S` prefix for engines that print something else after it.
pub fn parse_created(value: &str) -> Result<DateTime<Utc>, RecordError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        let utc = parsed.with_timezone(&Utc);
        return utc
            .with_nanosecond(0)
            .ok_or_else(|| RecordError::InvalidTimestamp(value.to_string()));
    }

    let without_fraction = value
        .split_once('.')
        .map(|(head, _)| head)
        .unwrap_or(value)
        .trim_end_matches('Z');

    NaiveDateTime::parse_from_str(without_fraction, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| RecordError::InvalidTimestamp(value.to_string()))
}
