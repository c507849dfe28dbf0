use std::collections::VecDeque;

use tracing::debug;

use crate::hash::XorShift32;
use crate::model::TestId;

/// Pending tests in execution order.
///
/// Prioritized tests (previous failures) go after earlier prioritized ones but before
/// everything else. With a non-empty seed, other tests are inserted at a pseudo-random
/// position after the prioritized block; the sequence is reproducible per seed.
#[derive(Debug, Default)]
pub(crate) struct ProcessingQueue {
    entries: VecDeque<TestId>,
    priority_count: usize,
    sampler: Option<XorShift32>,
}

impl ProcessingQueue {
    pub(crate) fn add(&mut self, test: TestId, prioritize: bool, seed: Option<&str>) {
        let at = if prioritize {
            let at = self.priority_count;
            self.priority_count += 1;
            at
        } else if let Some(seed) = seed.filter(|s| !s.is_empty()) {
            let sampler = self
                .sampler
                .get_or_insert_with(|| XorShift32::from_seed_str(seed));
            let span = self.entries.len() - self.priority_count + 1;
            self.priority_count + sampler.next_index(span)
        } else {
            self.entries.len()
        };
        debug!(target: "proctor::queue", test = test.0, at, prioritize, "enqueue");
        self.entries.insert(at, test);
    }

    pub(crate) fn pop(&mut self) -> Option<TestId> {
        let next = self.entries.pop_front()?;
        self.priority_count = self.priority_count.saturating_sub(1);
        Some(next)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the queue, returning what was dropped.
    pub(crate) fn clear(&mut self) -> Vec<TestId> {
        self.priority_count = 0;
        self.entries.drain(..).collect()
    }
}
