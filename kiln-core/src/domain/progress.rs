//! Progress events
//!
//! Side-channel output produced while a step runs. Events are delivered to a
//! sink as they arrive; they are never part of a step's return value.

use serde::{Deserialize, Serialize};

/// A single progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// One status line reported while pulling an image
    Pull(String),
    /// One line of combined stdout/stderr from a running container
    Output(String),
    /// Bytes of an archive uploaded so far
    Upload { sent: u64, total: u64 },
}

impl ProgressEvent {
    /// Upload completion as a percentage, if this is an upload event
    pub fn percent(&self) -> Option<f64> {
        match self {
            ProgressEvent::Upload { total: 0, .. } => Some(100.0),
            ProgressEvent::Upload { sent, total } => Some(*sent as f64 * 100.0 / *total as f64),
            _ => None,
        }
    }
}
