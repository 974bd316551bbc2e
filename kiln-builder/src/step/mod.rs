//! Pipeline steps
//!
//! A [`Step`] first tries to reuse a cached image through the
//! [`CacheResolver`]; when none qualifies it runs its kind-specific action
//! and commits the result to a new image carrying the step labels.
//!
//! A failed step leaves its container behind for inspection. Only a
//! successful commit removes the working container.

mod command;
mod copy;
mod pull;

use chrono::Utc;
use kiln_core::domain::config::{StepKind, StepSpec};
use kiln_core::domain::image::{ImageId, ImageRecord};
use kiln_core::domain::labels::StepLabels;
use kiln_core::error::ConfigError;
use kiln_engine::{Engine, ProgressSink};
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::CacheResolver;
use crate::error::Result;

/// Result of executing a step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub image: ImageRecord,
    pub cache_hit: bool,
}

/// One step of a pipeline run
pub struct Step<'a> {
    index: usize,
    spec: &'a StepSpec,
    labels: StepLabels,
    started: Instant,
}

impl<'a> Step<'a> {
    /// Creates step `index` of the pipeline for `repo`
    pub fn new(repo: &str, index: usize, spec: &'a StepSpec) -> Self {
        Self {
            index,
            spec,
            labels: StepLabels::new(repo, index, spec),
            started: Instant::now(),
        }
    }

    /// Resolves the step from cache or runs it
    ///
    /// # Arguments
    /// * `engine` - Engine to run against
    /// * `candidates` - Cache candidates for this step, empty when the run no
    ///   longer uses the cache
    /// * `previous` - Image produced by the previous step
    /// * `progress` - Sink for pull lines, command output and upload progress
    ///
    /// # Returns
    /// The resulting image and whether it came from the cache
    pub async fn execute(
        &mut self,
        engine: &dyn Engine,
        candidates: &[ImageRecord],
        previous: Option<&ImageRecord>,
        progress: &mut dyn ProgressSink,
    ) -> Result<StepOutcome> {
        if !candidates.is_empty() {
            let resolver = CacheResolver::new(self.index, self.spec, Utc::now());
            if let Some(cached) = resolver.select(candidates) {
                info!(
                    "Step {}: using cached {} (saved {:.2}s)",
                    self.index, cached, cached.runtime_seconds
                );
                return Ok(StepOutcome {
                    image: cached.clone(),
                    cache_hit: true,
                });
            }
        }

        self.started = Instant::now();
        let spec = self.spec;
        let image = match &spec.kind {
            StepKind::Pull(params) => {
                if previous.is_some() {
                    return Err(ConfigError::PullNotFirst { step: self.index }.into());
                }
                pull::run(self, engine, params, progress).await?
            }
            StepKind::Command(params) => {
                let base = self.base_image(previous)?;
                command::run(self, engine, params, base, progress).await?
            }
            StepKind::Copy(params) => {
                let base = self.base_image(previous)?;
                copy::run(self, engine, params, base, progress).await?
            }
        };

        info!(
            "Step {}: created {} in {:.2}s",
            self.index, image, image.runtime_seconds
        );

        Ok(StepOutcome {
            image,
            cache_hit: false,
        })
    }

    fn base_image<'r>(&self, previous: Option<&'r ImageRecord>) -> Result<&'r ImageRecord> {
        previous.ok_or_else(|| {
            ConfigError::MissingBaseImage {
                step: self.index,
                kind: self.spec.kind_name().to_string(),
            }
            .into()
        })
    }

    /// Restarts the runtime clock, for work that should not be measured
    fn reset_clock(&mut self) {
        self.started = Instant::now();
    }

    /// Commits a finished container and reads the new image back
    ///
    /// The container is removed once the image exists; failing to remove it
    /// only warns.
    async fn commit_container(
        &self,
        engine: &dyn Engine,
        container_id: &str,
    ) -> Result<ImageRecord> {
        let runtime = self.started.elapsed().as_secs_f64();
        let labels = self.labels.to_map(runtime);

        let raw_id = engine.commit(container_id, &labels, None).await?;

        if let Err(e) = engine.remove_container(container_id).await {
            warn!(
                "Step {}: failed to remove container {}: {}",
                self.index, container_id, e
            );
        }

        let id = ImageId::parse(&raw_id)?;
        let inspect = engine.inspect_image(id.as_str()).await?;
        Ok(ImageRecord::from_inspect(&inspect)?)
    }
}
