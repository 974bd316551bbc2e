//! Command step

use kiln_core::domain::config::CommandParams;
use kiln_core::domain::image::ImageRecord;
use kiln_engine::{Engine, ProgressSink};
use tracing::{debug, error, info};

use super::Step;
use crate::error::{BuildError, Result};

/// Runs the command line in a container built from `base` and commits it
///
/// A non-zero exit status fails the step without committing.
pub(super) async fn run(
    step: &mut Step<'_>,
    engine: &dyn Engine,
    params: &CommandParams,
    base: &ImageRecord,
    progress: &mut dyn ProgressSink,
) -> Result<ImageRecord> {
    let argv = params.argv();
    info!("Step {}: running '{}' in {}", step.index, params.command_line(), base);
    debug!("Step {}: container command {:?}", step.index, argv);

    let container = engine
        .create_container(base.id.as_str(), Some(argv.as_slice()))
        .await?;
    engine.start(&container).await?;
    engine.attach_stream(&container, progress).await?;

    let exit_code = engine.wait(&container).await?;
    if exit_code != 0 {
        error!(
            "Step {}: command exited with status {}, container {} kept",
            step.index, exit_code, container
        );
        return Err(BuildError::StepExecution {
            step: step.index,
            exit_code,
        });
    }

    step.commit_container(engine, &container).await
}
