//! Previous-failure storage.
//!
//! With `reorder` enabled, tests that failed last time are run first. The engine
//! records the number of failed assertions per test id at the end of each test,
//! forgets tests that passed, and clears everything after a run with no failures.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub trait FailureStore {
    /// Failed-assertion count recorded for the test last time, if any.
    fn previous_failure(&self, test_id: &str) -> Option<usize>;
    fn record_failure(&mut self, test_id: &str, bad: usize);
    fn clear(&mut self, test_id: &str);
    fn clear_all(&mut self);
}

/// In-memory store. Clones share the same entries, so a caller can keep a handle
/// and inspect it after a run.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    failures: Rc<RefCell<HashMap<String, usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, usize)>,
        K: Into<String>,
    {
        let store = Self::new();
        store
            .failures
            .borrow_mut()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
        store
    }

    pub fn len(&self) -> usize {
        self.failures.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.borrow().is_empty()
    }
}

impl FailureStore for MemoryStore {
    fn previous_failure(&self, test_id: &str) -> Option<usize> {
        self.failures.borrow().get(test_id).copied()
    }

    fn record_failure(&mut self, test_id: &str, bad: usize) {
        self.failures.borrow_mut().insert(test_id.to_string(), bad);
    }

    fn clear(&mut self, test_id: &str) {
        self.failures.borrow_mut().remove(test_id);
    }

    fn clear_all(&mut self) {
        self.failures.borrow_mut().clear();
    }
}
