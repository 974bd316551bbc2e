//! Pipeline orchestrator
//!
//! Drives one run of a pipeline:
//!
//! ```text
//! LOAD_CACHE -> RESOLVE_OR_EXECUTE (each step, in order) -> CLEANUP -> DONE
//! ```
//!
//! Any step error ends the run right away. Nothing created before the
//! failure is rolled back; `clean` removes it, or the next run reuses it.
//!
//! Once a step misses the cache, every later step runs without it: their
//! cached images were built on a lineage that no longer exists.

use kiln_core::domain::config::PipelineConfig;
use kiln_core::domain::image::{ImageId, ImageRecord};
use kiln_core::domain::labels::{STEP_LABEL, repo_filter};
use kiln_engine::{Engine, ProgressSink};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BuildOptions;
use crate::error::{BuildError, Result};
use crate::pool::CachePool;
use crate::report::{BuildReport, CleanReport, StepReport};
use crate::step::Step;

/// Runs a pipeline against an engine
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    pipeline: PipelineConfig,
    options: BuildOptions,
}

impl Orchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    /// * `engine` - Engine facade every step talks to
    /// * `pipeline` - The pipeline to build
    /// * `options` - Run-wide settings (global no-cache, step timeout)
    pub fn new(engine: Arc<dyn Engine>, pipeline: PipelineConfig, options: BuildOptions) -> Self {
        Self {
            engine,
            pipeline,
            options,
        }
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Queries the engine for every image of this pipeline's repo
    ///
    /// Images whose labels cannot be read are skipped with a warning. An
    /// image id that is not a 64 hex digest is an integrity error and fails
    /// the load.
    pub async fn load_cache(&self) -> Result<CachePool> {
        let summaries = self
            .engine
            .list_images(&repo_filter(&self.pipeline.repo))
            .await?;

        let mut records = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            match ImageRecord::from_summary(summary) {
                Ok(record) => records.push(record),
                Err(e) if e.is_integrity_violation() => return Err(e.into()),
                Err(e) => warn!("Ignoring image {}: {}", summary.id, e),
            }
        }

        let pool = CachePool::from_records(records);
        info!(
            "Loaded {} cached images for '{}'",
            pool.len(),
            self.pipeline.repo
        );
        Ok(pool)
    }

    /// Builds the pipeline
    ///
    /// # Returns
    /// The report of the run, naming the image of the last step
    pub async fn build(&self, progress: &mut dyn ProgressSink) -> Result<BuildReport> {
        self.pipeline.validate()?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "Run {}: building '{}' ({} steps)",
            run_id,
            self.pipeline.repo,
            self.pipeline.steps.len()
        );

        let mut pool = self.load_cache().await?;
        let mut cache_enabled = !self.options.no_cache;
        if !cache_enabled {
            info!("Run {}: cache disabled", run_id);
        }

        let mut previous: Option<ImageRecord> = None;
        let mut steps = Vec::with_capacity(self.pipeline.steps.len());

        for (index, spec) in self.pipeline.steps.iter().enumerate() {
            let candidates = if cache_enabled {
                pool.candidates(index)
            } else {
                &[]
            };

            info!(
                "Run {}: step {} ({}), {} cache candidates",
                run_id,
                index,
                spec.kind_name(),
                candidates.len()
            );

            let mut step = Step::new(&self.pipeline.repo, index, spec);
            let execution = step.execute(
                self.engine.as_ref(),
                candidates,
                previous.as_ref(),
                progress,
            );
            let outcome = match self.options.step_timeout {
                Some(after) => tokio::time::timeout(after, execution)
                    .await
                    .map_err(|_| BuildError::Timeout { step: index, after })??,
                None => execution.await?,
            };

            pool.mark_used(&outcome.image.id);
            if !outcome.cache_hit && cache_enabled {
                debug!("Run {}: cache disabled from step {} on", run_id, index);
                cache_enabled = false;
            }

            steps.push(StepReport::new(
                index,
                spec.kind_name(),
                &outcome.image,
                outcome.cache_hit,
            ));
            previous = Some(outcome.image);
        }

        let removed = self.remove_unused(pool).await;

        let image = match previous {
            Some(image) => image.id,
            None => return Err(kiln_core::ConfigError::NoSteps.into()),
        };

        let report = BuildReport {
            run_id,
            image,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            steps,
            removed,
        };

        info!(
            "Run {}: built {} in {:.2}s ({} cache hits, {:.2}s saved)",
            run_id,
            report.image,
            report.elapsed_seconds,
            report.cache_hits(),
            report.time_saved()
        );
        Ok(report)
    }

    /// Removes cache images the run did not use
    ///
    /// Never fails: an image already gone is skipped silently, any other
    /// removal error is logged.
    async fn remove_unused(&self, pool: CachePool) -> Vec<ImageId> {
        let mut removed = Vec::new();

        for record in pool.into_unused() {
            match self.engine.remove_image(record.id.as_str()).await {
                Ok(()) => {
                    info!(
                        "Removed unused {} of step {}",
                        record, record.step_index
                    );
                    removed.push(record.id);
                }
                Err(e) if e.is_not_found() => {
                    debug!("Unused {} already removed", record);
                }
                Err(e) => {
                    warn!("Failed to remove unused {}: {}", record, e);
                }
            }
        }

        removed
    }

    /// Removes every container and image labeled with this pipeline's repo
    ///
    /// Images are removed from the last step back to the first, so derived
    /// images go before their bases. Resources that are already gone are
    /// ignored.
    pub async fn clean(&self) -> Result<CleanReport> {
        let filter = repo_filter(&self.pipeline.repo);
        let mut report = CleanReport::default();

        for container in self.engine.list_containers(&filter).await? {
            match self.engine.remove_container(&container).await {
                Ok(()) => {
                    info!("Removed container {}", container);
                    report.containers_removed.push(container);
                }
                Err(e) if e.is_not_found() => debug!("Container {} already removed", container),
                Err(e) => return Err(e.into()),
            }
        }

        let mut images = Vec::new();
        for summary in self.engine.list_images(&filter).await? {
            let id = ImageId::parse(&summary.id)?;
            // Unreadable step labels sort first
            let step = summary
                .labels()
                .get(STEP_LABEL)
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            images.push((step, id));
        }
        images.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (step, id) in images {
            match self.engine.remove_image(id.as_str()).await {
                Ok(()) => {
                    info!("Removed image {} of step {}", id.short(), step);
                    report.images_removed.push(id);
                }
                Err(e) if e.is_not_found() => debug!("Image {} already removed", id.short()),
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Cleaned '{}': {} containers, {} images",
            self.pipeline.repo,
            report.containers_removed.len(),
            report.images_removed.len()
        );
        Ok(report)
    }

    /// Cached images of this pipeline, by step then newest first
    pub async fn cache_listing(&self) -> Result<Vec<ImageRecord>> {
        let pool = self.load_cache().await?;
        let mut records: Vec<ImageRecord> = pool.records().cloned().collect();
        records.sort_by(|a, b| {
            a.step_index
                .cmp(&b.step_index)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use chrono::TimeDelta;
    use kiln_core::domain::config::StepSpec;
    use kiln_core::domain::labels::REPO_LABEL;
    use kiln_core::error::{ConfigError, RecordError};
    use kiln_engine::NullSink;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn three_steps() -> Vec<StepSpec> {
        vec![
            StepSpec::pull("busybox", "musl"),
            StepSpec::command(["touch /x"]),
            StepSpec::command(["echo done > /y"]),
        ]
    }

    fn orchestrator(engine: &Arc<FakeEngine>, steps: Vec<StepSpec>) -> Orchestrator {
        Orchestrator::new(
            engine.clone(),
            PipelineConfig::new("t", steps),
            BuildOptions::default(),
        )
    }

    async fn build(engine: &Arc<FakeEngine>, steps: Vec<StepSpec>) -> BuildReport {
        orchestrator(engine, steps).build(&mut NullSink).await.unwrap()
    }

    fn hits(report: &BuildReport) -> Vec<bool> {
        report.steps.iter().map(|s| s.cache_hit).collect()
    }

    #[tokio::test]
    async fn test_pull_only_pipeline_twice() {
        let engine = Arc::new(FakeEngine::new());
        let steps = vec![StepSpec::pull("busybox", "musl")];

        let first = build(&engine, steps.clone()).await;
        assert_eq!(hits(&first), vec![false]);
        assert_eq!(first.steps[0].index, 0);

        let listing = orchestrator(&engine, steps.clone())
            .cache_listing()
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].repo(), Some("t"));
        assert_eq!(listing[0].step_index, 0);

        let second = build(&engine, steps).await;
        assert_eq!(hits(&second), vec![true]);
        assert_eq!(second.image, first.image);
        assert!(second.removed.is_empty());
    }

    #[tokio::test]
    async fn test_command_builds_on_pulled_image() {
        let engine = Arc::new(FakeEngine::new());
        let steps = vec![
            StepSpec::pull("busybox", "musl"),
            StepSpec::command(["touch /x"]),
        ];

        let report = build(&engine, steps).await;

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.image, report.steps[1].image_id);
        assert_eq!(
            engine.parent_of(&report.steps[1].image_id),
            Some(report.steps[0].image_id.to_string())
        );
        assert_eq!(engine.image_count(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_rerun_hits_every_step() {
        let engine = Arc::new(FakeEngine::new());

        let first = build(&engine, three_steps()).await;
        let images = engine.image_count();
        let second = build(&engine, three_steps()).await;

        assert_eq!(hits(&second), vec![true, true, true]);
        assert_eq!(second.image, first.image);
        assert_eq!(engine.image_count(), images);
        let recorded: f64 = first.steps.iter().map(|s| s.runtime_seconds).sum();
        assert_eq!(second.time_saved(), recorded);
    }

    #[tokio::test]
    async fn test_changed_step_invalidates_rest() {
        let engine = Arc::new(FakeEngine::new());
        let first = build(&engine, three_steps()).await;

        let mut changed = three_steps();
        changed[1] = StepSpec::command(["touch /z"]);
        let second = build(&engine, changed).await;

        assert_eq!(hits(&second), vec![true, false, false]);
        assert_eq!(second.steps[0].image_id, first.steps[0].image_id);

        // Superseded images of steps 1 and 2 are gone, the base stays
        assert_eq!(
            second.removed,
            vec![
                first.steps[2].image_id.clone(),
                first.steps[1].image_id.clone()
            ]
        );
        assert!(!engine.has_image(&first.steps[1].image_id));
        assert!(!engine.has_image(&first.steps[2].image_id));
        assert!(engine.has_image(&first.steps[0].image_id));
    }

    #[tokio::test]
    async fn test_nocache_step_always_executes() {
        let engine = Arc::new(FakeEngine::new());
        let mut steps = three_steps();
        steps[1] = steps[1].clone().with_nocache(true);

        let first = build(&engine, steps.clone()).await;
        let second = build(&engine, steps).await;

        assert_eq!(hits(&second), vec![true, false, false]);
        assert_ne!(second.steps[1].image_id, first.steps[1].image_id);
        assert!(!engine.has_image(&first.steps[1].image_id));
    }

    #[tokio::test]
    async fn test_invalidate_after_expires_old_image() {
        let engine = Arc::new(FakeEngine::new());
        let mut steps = three_steps();
        steps[1] = steps[1]
            .clone()
            .with_invalidate_after(Duration::from_secs(3600));

        let first = build(&engine, steps.clone()).await;
        let fresh = build(&engine, steps.clone()).await;
        assert_eq!(hits(&fresh), vec![true, true, true]);

        engine.age_image(&first.steps[1].image_id, TimeDelta::hours(2));
        let expired = build(&engine, steps).await;
        assert_eq!(hits(&expired), vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_global_no_cache_rebuilds_and_removes_previous() {
        let engine = Arc::new(FakeEngine::new());
        let first = build(&engine, three_steps()).await;

        let report = Orchestrator::new(
            engine.clone(),
            PipelineConfig::new("t", three_steps()),
            BuildOptions::default().with_no_cache(true),
        )
        .build(&mut NullSink)
        .await
        .unwrap();

        assert_eq!(hits(&report), vec![false, false, false]);
        assert_eq!(report.removed.len(), 3);
        for step in &first.steps {
            assert!(!engine.has_image(&step.image_id));
        }
        assert_eq!(engine.image_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_command_aborts_without_cleanup() {
        let engine = Arc::new(FakeEngine::new());
        let first = build(&engine, three_steps()).await;

        engine.fail_command("exit 42", 42);
        let mut steps = three_steps();
        steps[1] = StepSpec::command(["exit 42"]);

        let err = orchestrator(&engine, steps)
            .build(&mut NullSink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::StepExecution {
                step: 1,
                exit_code: 42
            }
        ));
        assert_eq!(err.exit_code(), 42);
        for step in &first.steps {
            assert!(engine.has_image(&step.image_id));
        }
        // Step 2 never ran
        let commands = engine.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[2][2], "exit 42");
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let engine = Arc::new(FakeEngine::new());
        engine.set_wait_delay(Duration::from_millis(500));

        let err = Orchestrator::new(
            engine.clone(),
            PipelineConfig::new("t", three_steps()),
            BuildOptions::default().with_step_timeout(Duration::from_millis(50)),
        )
        .build(&mut NullSink)
        .await
        .unwrap_err();

        assert!(matches!(err, BuildError::Timeout { step: 1, .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_fail_run() {
        let engine = Arc::new(FakeEngine::new());
        let first = build(&engine, three_steps()).await;

        engine.protect_image(&first.steps[2].image_id);
        engine.vanish_image(&first.steps[1].image_id);

        let mut changed = three_steps();
        changed[1] = StepSpec::command(["touch /z"]);
        let report = build(&engine, changed).await;

        assert_eq!(hits(&report), vec![true, false, false]);
        assert!(engine.has_image(&first.steps[2].image_id));
        assert!(!report.removed.contains(&first.steps[2].image_id));
    }

    #[tokio::test]
    async fn test_invalid_image_id_is_fatal() {
        let engine = Arc::new(FakeEngine::new());
        let mut labels = BTreeMap::new();
        labels.insert(REPO_LABEL.to_string(), "t".to_string());
        engine.insert_raw_image("deadbeef", labels);

        let err = orchestrator(&engine, three_steps())
            .build(&mut NullSink)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Record(RecordError::InvalidId(_))));
        assert!(engine.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_labels_are_skipped() {
        let engine = Arc::new(FakeEngine::new());
        let mut labels = BTreeMap::new();
        labels.insert(REPO_LABEL.to_string(), "t".to_string());
        let raw = "f".repeat(64);
        engine.insert_raw_image(&raw, labels);

        let pool = orchestrator(&engine, three_steps())
            .load_cache()
            .await
            .unwrap();
        assert!(pool.is_empty());

        let report = build(&engine, three_steps()).await;
        assert_eq!(hits(&report), vec![false, false, false]);
        assert!(engine.has_image(&ImageId::parse(&raw).unwrap()));
    }

    #[tokio::test]
    async fn test_other_repos_are_left_alone() {
        let engine = Arc::new(FakeEngine::new());
        let other = engine.insert_image("other", 0, &StepSpec::pull("busybox", "musl"));

        let report = build(&engine, three_steps()).await;
        assert_eq!(hits(&report), vec![false, false, false]);
        assert!(engine.has_image(&other));
    }

    #[tokio::test]
    async fn test_previous_run_images_are_candidates() {
        let engine = Arc::new(FakeEngine::new());
        let cached = engine.insert_image("t", 0, &StepSpec::pull("busybox", "musl"));

        let report = build(&engine, three_steps()).await;
        assert_eq!(hits(&report), vec![true, false, false]);
        assert_eq!(report.steps[0].image_id, cached);
        assert_eq!(report.steps[0].runtime_seconds, 2.0);
        assert!(engine.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_newest_candidate_wins() {
        let engine = Arc::new(FakeEngine::new());
        let spec = StepSpec::pull("busybox", "musl");
        let older = engine.insert_image("t", 0, &spec);
        let newer = engine.insert_image("t", 0, &spec);

        let report = build(&engine, vec![spec]).await;
        assert_eq!(report.image, newer);
        assert_eq!(report.removed, vec![older.clone()]);
        assert!(!engine.has_image(&older));
    }

    #[tokio::test]
    async fn test_invalid_config_touches_nothing() {
        let engine = Arc::new(FakeEngine::new());
        let steps = vec![
            StepSpec::pull("busybox", "musl"),
            StepSpec::pull("alpine", "3"),
        ];

        let err = orchestrator(&engine, steps)
            .build(&mut NullSink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Config(ConfigError::PullNotFirst { step: 1 })
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clean_removes_everything_in_descending_step_order() {
        let engine = Arc::new(FakeEngine::new());
        let other = engine.insert_image("other", 0, &StepSpec::pull("busybox", "musl"));
        let report = build(&engine, three_steps()).await;

        let mut labels = BTreeMap::new();
        labels.insert(REPO_LABEL.to_string(), "t".to_string());
        let container = engine.insert_container(labels);

        let cleaned = orchestrator(&engine, three_steps()).clean().await.unwrap();

        assert_eq!(cleaned.containers_removed, vec![container]);
        let expected: Vec<ImageId> = report
            .steps
            .iter()
            .rev()
            .map(|s| s.image_id.clone())
            .collect();
        assert_eq!(cleaned.images_removed, expected);
        assert_eq!(engine.image_count(), 1);
        assert!(engine.has_image(&other));

        let again = orchestrator(&engine, three_steps()).clean().await.unwrap();
        assert!(again.containers_removed.is_empty());
        assert!(again.images_removed.is_empty());
    }

    #[tokio::test]
    async fn test_clean_propagates_real_failures() {
        let engine = Arc::new(FakeEngine::new());
        let report = build(&engine, three_steps()).await;
        engine.protect_image(&report.steps[0].image_id);

        let err = orchestrator(&engine, three_steps())
            .clean()
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Engine(_)));
    }
}
