//! Cache pool
//!
//! Images of previous runs grouped by step index, plus the set of those not
//! yet claimed by the current run. Whatever is still unused when the run ends
//! gets removed from the engine.

use kiln_core::domain::image::{ImageId, ImageRecord};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
pub struct CachePool {
    by_step: BTreeMap<usize, Vec<ImageRecord>>,
    unused: HashSet<ImageId>,
}

impl CachePool {
    /// Groups records by step; every record starts out unused
    pub fn from_records(records: impl IntoIterator<Item = ImageRecord>) -> Self {
        let mut pool = Self::default();

        for record in records {
            if !pool.unused.insert(record.id.clone()) {
                continue;
            }
            pool.by_step
                .entry(record.step_index)
                .or_default()
                .push(record);
        }

        pool
    }

    /// Cache candidates for a step
    pub fn candidates(&self, step: usize) -> &[ImageRecord] {
        self.by_step.get(&step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Claims an image for the current run
    ///
    /// # Returns
    /// `true` if the image was in the unused set
    pub fn mark_used(&mut self, id: &ImageId) -> bool {
        self.unused.remove(id)
    }

    pub fn len(&self) -> usize {
        self.by_step.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_step.is_empty()
    }

    /// All records, by ascending step
    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.by_step.values().flatten()
    }

    /// Consumes the pool, returning the records nobody claimed
    ///
    /// Ordered by descending step so derived images go before their bases.
    pub fn into_unused(self) -> Vec<ImageRecord> {
        let Self { by_step, unused } = self;

        by_step
            .into_values()
            .rev()
            .flatten()
            .filter(|record| unused.contains(&record.id))
            .collect()
    }
}
