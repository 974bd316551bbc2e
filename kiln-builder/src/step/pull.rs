//! Pull step

use kiln_core::domain::config::PullParams;
use kiln_core::domain::image::ImageRecord;
use kiln_engine::{Engine, ProgressSink};
use tracing::info;

use super::Step;
use crate::error::Result;

/// Pulls the base image and wraps it in a committed image of this step
///
/// The pull itself is not part of the recorded runtime.
pub(super) async fn run(
    step: &mut Step<'_>,
    engine: &dyn Engine,
    params: &PullParams,
    progress: &mut dyn ProgressSink,
) -> Result<ImageRecord> {
    let reference = params.reference();
    info!("Step {}: pulling {}", step.index, reference);

    engine.pull(&params.image, &params.tag, progress).await?;
    step.reset_clock();

    let container = engine.create_container(&reference, None).await?;
    step.commit_container(engine, &container).await
}
