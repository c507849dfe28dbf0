//! Immutable, serializable snapshots carried by events.
//!
//! Snapshots are built from the model at the moment an event fires and never change
//! afterwards, so listeners may keep them.

use serde::Serialize;

use crate::diff::Diff;
use crate::value::Value;

/// Outcome of a test or a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    Todo,
}

impl Status {
    /// Status of a finished test.
    ///
    /// A todo test passes only when at least one of its assertions failed.
    pub fn of_test(skipped: bool, todo: bool, failed_assertions: usize) -> Status {
        if skipped {
            return Status::Skipped;
        }
        let passed = if failed_assertions > 0 { todo } else { !todo };
        if !passed {
            Status::Failed
        } else if todo {
            Status::Todo
        } else {
            Status::Passed
        }
    }
}

/// Test totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub total: usize,
}

impl TestCounts {
    pub(crate) fn record(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Todo => self.todo += 1,
        }
        self.total += 1;
    }

    /// Aggregate status: failed if anything failed, skipped or todo if every test
    /// was, passed otherwise.
    pub fn status(&self) -> Status {
        if self.failed > 0 {
            Status::Failed
        } else if self.skipped == self.total {
            Status::Skipped
        } else if self.todo == self.total {
            Status::Todo
        } else {
            Status::Passed
        }
    }
}

/// Assertion totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssertionStats {
    pub all: usize,
    pub bad: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStartReport {
    /// Tests queued when the run started.
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteStartReport {
    pub name: String,
    pub full_name: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteEndReport {
    pub name: String,
    pub full_name: Vec<String>,
    pub status: Status,
    pub test_counts: TestCounts,
    pub stats: AssertionStats,
    pub runtime_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestStartReport {
    pub name: String,
    pub test_id: String,
    pub suite_name: String,
    /// Group path followed by the test name.
    pub full_name: Vec<String>,
    pub previous_failure: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssertionReport {
    pub passed: bool,
    pub message: Option<String>,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
    pub negative: bool,
    pub stack: Option<String>,
    pub todo: bool,
    pub runtime_ms: u64,
    /// `diff(dump(expected), dump(actual))` for failed, non-negated comparisons.
    pub diff: Option<Vec<Diff>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestEndReport {
    pub name: String,
    pub test_id: String,
    pub suite_name: String,
    pub full_name: Vec<String>,
    pub status: Status,
    pub runtime_ms: u64,
    pub errors: Vec<AssertionReport>,
    pub assertions: Vec<AssertionReport>,
}

/// Summary of a whole run; emitted with `RunEnd` and returned by `Suite::run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: Status,
    pub test_counts: TestCounts,
    pub stats: AssertionStats,
    pub global_failures: usize,
    pub runtime_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status != Status::Failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub stack: Option<String>,
}
