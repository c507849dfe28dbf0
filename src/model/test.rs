use std::time::Instant;

use super::{Callback, Env, GroupId};
use crate::scheduler::PauseSet;
use crate::value::Value;

/// A registered test.
pub(crate) struct Test {
    /// Unique within the owning group.
    pub(crate) name: String,
    pub(crate) test_id: String,
    pub(crate) group: GroupId,
    /// `None` for skipped tests.
    pub(crate) callback: Option<Callback>,
    pub(crate) expected: Option<usize>,
    pub(crate) assertions: Vec<AssertionRecord>,
    pub(crate) skip: bool,
    pub(crate) todo: bool,
    /// Engine-generated; bypasses filtering.
    pub(crate) internal: bool,
    /// Dropped by filtering or focus; never runs.
    pub(crate) ignored: bool,
    pub(crate) pauses: PauseSet,
    /// Per-test timeout override in milliseconds.
    pub(crate) timeout: Option<u64>,
    pub(crate) steps: Vec<String>,
    pub(crate) env: Env,
    pub(crate) previous_failure: bool,
    /// Run `before` hooks this time round, so the environment is carried back to the group.
    pub(crate) preserve_env: bool,
    /// Where the test was registered.
    pub(crate) source: String,
    pub(crate) started: Option<Instant>,
    pub(crate) runtime_ms: u64,
}

impl Test {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        test_id: String,
        group: GroupId,
        callback: Option<Callback>,
        skip: bool,
        todo: bool,
        source: String,
        internal: bool,
    ) -> Self {
        Self {
            name,
            test_id,
            group,
            callback: if skip { None } else { callback },
            // Skipped tests make no assertions and must not be flagged for it.
            expected: if skip { Some(0) } else { None },
            assertions: Vec::new(),
            skip,
            todo,
            internal,
            ignored: false,
            pauses: PauseSet::default(),
            timeout: None,
            steps: Vec::new(),
            env: Env::new(),
            previous_failure: false,
            preserve_env: false,
            source,
            started: None,
            runtime_ms: 0,
        }
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started
            .map_or(0, |started| started.elapsed().as_millis() as u64)
    }

    pub(crate) fn failed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| !a.result).count()
    }

    /// Drops the compared values once they have been reported.
    pub(crate) fn slim_assertions(&mut self) {
        for assertion in &mut self.assertions {
            assertion.actual = None;
            assertion.expected = None;
        }
    }
}

/// One recorded assertion.
#[derive(Debug, Clone)]
pub(crate) struct AssertionRecord {
    pub(crate) result: bool,
    pub(crate) message: Option<String>,
    pub(crate) actual: Option<Value>,
    pub(crate) expected: Option<Value>,
    pub(crate) negative: bool,
    pub(crate) source: Option<String>,
    pub(crate) runtime_ms: u64,
    pub(crate) todo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::callback;

    fn record(result: bool) -> AssertionRecord {
        AssertionRecord {
            result,
            message: None,
            actual: Some(Value::from(1)),
            expected: Some(Value::from(2)),
            negative: false,
            source: None,
            runtime_ms: 0,
            todo: false,
        }
    }

    #[test]
    fn test_skipped_test_expects_nothing() {
        let test = Test::new(
            "t".into(),
            "id".into(),
            GroupId(0),
            Some(callback(|_| ())),
            true,
            false,
            String::new(),
            false,
        );
        assert!(test.callback.is_none());
        assert_eq!(test.expected, Some(0));
    }

    #[test]
    fn test_slimming_keeps_results() {
        let mut test = Test::new(
            "t".into(),
            "id".into(),
            GroupId(0),
            None,
            false,
            false,
            String::new(),
            false,
        );
        test.assertions.push(record(true));
        test.assertions.push(record(false));
        test.slim_assertions();
        assert_eq!(test.failed_assertions(), 1);
        assert!(test.assertions.iter().all(|a| a.actual.is_none() && a.expected.is_none()));
    }
}
