//! Run reports

use kiln_core::domain::image::{ImageId, ImageRecord};
use serde::Serialize;
use uuid::Uuid;

/// What happened to one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub kind: &'static str,
    pub image_id: ImageId,
    pub cache_hit: bool,
    /// Runtime recorded on the image; for a cache hit, the time it saved
    pub runtime_seconds: f64,
}

impl StepReport {
    pub fn new(index: usize, kind: &'static str, image: &ImageRecord, cache_hit: bool) -> Self {
        Self {
            index,
            kind,
            image_id: image.id.clone(),
            cache_hit,
            runtime_seconds: image.runtime_seconds,
        }
    }
}

/// Outcome of a build run
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub run_id: Uuid,
    /// Image produced by the last step
    pub image: ImageId,
    pub elapsed_seconds: f64,
    pub steps: Vec<StepReport>,
    /// Superseded cache images removed after the run
    pub removed: Vec<ImageId>,
}

impl BuildReport {
    /// Sum of the recorded runtimes of every cache hit
    pub fn time_saved(&self) -> f64 {
        self.steps
            .iter()
            .filter(|step| step.cache_hit)
            .map(|step| step.runtime_seconds)
            .sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.steps.iter().filter(|step| step.cache_hit).count()
    }
}

/// Outcome of a clean run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub containers_removed: Vec<String>,
    pub images_removed: Vec<ImageId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{image_id, record};
    use chrono::Utc;
    use kiln_core::domain::config::StepSpec;

    #[test]
    fn test_time_saved_counts_hits_only() {
        let spec = StepSpec::command(["make"]);
        let mut hit = record(1, 0, &spec, Utc::now());
        hit.runtime_seconds = 2.5;
        let mut miss = record(2, 1, &spec, Utc::now());
        miss.runtime_seconds = 7.0;

        let report = BuildReport {
            run_id: Uuid::new_v4(),
            image: miss.id.clone(),
            elapsed_seconds: 7.1,
            steps: vec![
                StepReport::new(0, "command", &hit, true),
                StepReport::new(1, "command", &miss, false),
            ],
            removed: vec![image_id(9)],
        };

        assert_eq!(report.time_saved(), 2.5);
        assert_eq!(report.cache_hits(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let spec = StepSpec::pull("busybox", "musl");
        let image = record(1, 0, &spec, Utc::now());
        let report = BuildReport {
            run_id: Uuid::nil(),
            image: image.id.clone(),
            elapsed_seconds: 1.0,
            steps: vec![StepReport::new(0, "pull", &image, false)],
            removed: Vec::new(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["image"], image.id.as_str());
        assert_eq!(json["steps"][0]["kind"], "pull");
        assert_eq!(json["steps"][0]["cache_hit"], false);
    }
}
