//! Cache resolver
//!
//! Decides whether an image left by a previous run can stand in for a step.
//! A candidate must pass three independent checks, evaluated in order and
//! stopping at the first failure:
//!
//! 1. its config fingerprint equals the step's fingerprint
//! 2. the step does not set `nocache`
//! 3. if the step sets `invalidate_after`, the image is not older than that
//!
//! Among valid candidates the most recently created one wins, ties going to
//! the greatest id.

use chrono::{DateTime, TimeDelta, Utc};
use kiln_core::domain::config::StepSpec;
use kiln_core::domain::fingerprint::ConfigFingerprint;
use kiln_core::domain::image::ImageRecord;
use std::fmt;
use tracing::debug;

/// Why a cache candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The step configuration changed since the image was built
    ConfigChanged {
        expected: ConfigFingerprint,
        found: ConfigFingerprint,
    },
    /// The step opts out of caching
    NoCache,
    /// The image is older than the step's `invalidate_after`
    Expired {
        created_at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigChanged { expected, found } => write!(
                f,
                "config changed (expected {}, found {})",
                expected.short(),
                found.short()
            ),
            Self::NoCache => write!(f, "step has nocache set"),
            Self::Expired { created_at, cutoff } => write!(
                f,
                "created {} is before invalidation cutoff {}",
                created_at.to_rfc3339(),
                cutoff.to_rfc3339()
            ),
        }
    }
}

/// Cache validity checks for one step, evaluated at a fixed instant
pub struct CacheResolver<'a> {
    step: usize,
    spec: &'a StepSpec,
    fingerprint: ConfigFingerprint,
    now: DateTime<Utc>,
}

impl<'a> CacheResolver<'a> {
    /// Creates a resolver for step `step`
    ///
    /// # Arguments
    /// * `step` - Step index, used in log lines
    /// * `spec` - The step's configuration
    /// * `now` - Reference time for `invalidate_after`
    pub fn new(step: usize, spec: &'a StepSpec, now: DateTime<Utc>) -> Self {
        Self {
            step,
            spec,
            fingerprint: spec.fingerprint(),
            now,
        }
    }

    /// Runs the checks against one candidate
    pub fn check(&self, candidate: &ImageRecord) -> Result<(), Rejection> {
        if candidate.config_fingerprint != self.fingerprint {
            return Err(Rejection::ConfigChanged {
                expected: self.fingerprint.clone(),
                found: candidate.config_fingerprint.clone(),
            });
        }

        if self.spec.nocache {
            return Err(Rejection::NoCache);
        }

        if let Some(cutoff) = self.cutoff() {
            if candidate.created_at < cutoff {
                return Err(Rejection::Expired {
                    created_at: candidate.created_at,
                    cutoff,
                });
            }
        }

        Ok(())
    }

    /// Whether `candidate` may be reused, logging the reason when it may not
    pub fn is_valid(&self, candidate: &ImageRecord) -> bool {
        match self.check(candidate) {
            Ok(()) => true,
            Err(reason) => {
                debug!(
                    "Step {}: cache candidate {} rejected: {}",
                    self.step, candidate, reason
                );
                false
            }
        }
    }

    /// Picks the newest valid candidate
    pub fn select<'r>(&self, candidates: &'r [ImageRecord]) -> Option<&'r ImageRecord> {
        candidates
            .iter()
            .filter(|candidate| self.is_valid(candidate))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Oldest acceptable creation time, if the step expires its cache
    ///
    /// A duration too large to represent never expires anything.
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        let after = self.spec.invalidate_after?;
        let delta = TimeDelta::from_std(after).ok()?;
        self.now.checked_sub_signed(delta)
    }
}
