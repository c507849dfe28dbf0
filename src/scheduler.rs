//! Cooperative run loop.
//!
//! Tests are drained from a [`queue::ProcessingQueue`] one at a time. Each test is
//! expanded into a list of tasks (hooks, body, bookkeeping) that run in order. After
//! every task the scheduler settles: while the test holds pauses it waits for a
//! release or for the timeout, and once the last pause is released it gives
//! outstanding work one more tick before moving on.
//!
//! Everything runs on one thread inside a [`tokio::task::LocalSet`]. Futures returned
//! by callbacks are spawned locally so they make progress while the scheduler waits.
//! No `RefCell` borrow is held while user code runs.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, info, warn};

use crate::assert::AssertionResult;
use crate::config::RunConfig;
use crate::diff::diff;
use crate::errors::{error_stack, error_string, EngineError, ProtocolError};
use crate::events::{Event, EventBus};
use crate::filter::TestFilter;
use crate::model::{
    self, AssertionRecord, Env, GroupId, HookTable, Model, Modifiers, TestId, ROOT,
};
use crate::report::{
    AssertionReport, AssertionStats, ErrorReport, RunReport, RunStartReport, Status, TestCounts,
};
use crate::store::FailureStore;
use crate::value::dump;

mod pause;
mod queue;
mod task;

pub(crate) use pause::PauseSet;
pub use pause::Release;
use queue::ProcessingQueue;

/// Running deadline of the current pause.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: tokio::time::Instant,
    millis: u64,
}

#[derive(Default)]
pub(crate) struct RunState {
    pub(crate) current: Option<TestId>,
    /// Set by a pause; cleared when the scheduler resumes.
    blocking: bool,
    running: bool,
    started: bool,
    finished: bool,
    run_started: Option<Instant>,
    last_yield: Option<Instant>,
    deadline: Option<Deadline>,
    spawned: Vec<JoinHandle<()>>,
    saved_globals: Vec<String>,
    stats: AssertionStats,
    counts: TestCounts,
    global_failures: usize,
}

/// Shared state of one suite: model, queue, listeners and run bookkeeping.
pub(crate) struct RunContext {
    pub(crate) config: RunConfig,
    filter: TestFilter,
    pub(crate) model: RefCell<Model>,
    queue: RefCell<ProcessingQueue>,
    pub(crate) global_hooks: RefCell<HookTable>,
    pub(crate) bus: EventBus,
    store: RefCell<Box<dyn FailureStore>>,
    pub(crate) state: RefCell<RunState>,
    pub(crate) globals: Env,
    wake: Notify,
}

impl RunContext {
    pub(crate) fn new(config: RunConfig, store: Box<dyn FailureStore>) -> Self {
        Self {
            filter: TestFilter::new(&config),
            config,
            model: RefCell::new(Model::new()),
            queue: RefCell::new(ProcessingQueue::default()),
            global_hooks: RefCell::new(HookTable::default()),
            bus: EventBus::default(),
            store: RefCell::new(store),
            state: RefCell::new(RunState::default()),
            globals: Env::new(),
            wake: Notify::new(),
        }
    }

    pub(crate) fn test_name(&self, test: TestId) -> String {
        self.model.borrow().test(test).name.clone()
    }

    pub(crate) fn track_spawned(&self, handle: JoinHandle<()>) {
        self.state.borrow_mut().spawned.push(handle);
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    /// Queues a freshly registered test, or marks it ignored when filtered out.
    pub(crate) fn enqueue(&self, test: TestId) {
        let valid = self.filter.accepts(&self.model.borrow(), test);
        let (group, test_id, name) = {
            let model = self.model.borrow();
            let t = model.test(test);
            (t.group, t.test_id.clone(), t.name.clone())
        };
        if !valid {
            let mut model = self.model.borrow_mut();
            model.test_mut(test).ignored = true;
            model.increment_tests_ignored(group);
            debug!(target: "proctor::filter", test = %name, "filtered out");
            return;
        }

        if self.state.borrow().finished {
            warn!(
                target: "proctor::scheduler",
                test = %name,
                "test registered after the run finished; running it anyway"
            );
        }
        let previous = self.store.borrow().previous_failure(&test_id).unwrap_or(0);
        self.model.borrow_mut().test_mut(test).previous_failure = previous > 0;
        let prioritize = self.config.reorder && previous > 0;
        self.queue
            .borrow_mut()
            .add(test, prioritize, self.config.seed.as_deref());
    }

    /// Drops everything queued so far; used when focus mode kicks in.
    pub(crate) fn drop_queued(&self) {
        let dropped = self.queue.borrow_mut().clear();
        let mut model = self.model.borrow_mut();
        for test in &dropped {
            let group = model.test(*test).group;
            model.test_mut(*test).ignored = true;
            model.increment_tests_ignored(group);
        }
        debug!(target: "proctor::scheduler", dropped = dropped.len(), "focus dropped queued tests");
    }

    // ------------------------------------------------------------------
    // assertions
    // ------------------------------------------------------------------

    pub(crate) fn push_result(
        &self,
        test: TestId,
        input: AssertionResult,
    ) -> Result<(), ProtocolError> {
        if self.state.borrow().current != Some(test) {
            return Err(ProtocolError::AssertionOutsideTest {
                test: self.test_name(test),
                message: input.message.unwrap_or_default(),
            });
        }
        self.record(test, input);
        Ok(())
    }

    /// Records an engine-generated failure.
    pub(crate) fn push_failure(&self, test: TestId, message: String, source: Option<String>) {
        self.record(
            test,
            AssertionResult {
                result: false,
                message: Some(message),
                source,
                ..AssertionResult::default()
            },
        );
    }

    fn record(&self, test: TestId, input: AssertionResult) {
        let report = {
            let mut model = self.model.borrow_mut();
            let t = model.test_mut(test);
            let record = AssertionRecord {
                result: input.result,
                message: input.message,
                actual: input.actual,
                expected: input.expected,
                negative: input.negative,
                source: if input.result { None } else { input.source },
                runtime_ms: t.elapsed_ms(),
                todo: t.todo,
            };
            let report = assertion_report(&record);
            t.assertions.push(record);
            report
        };
        if !report.passed {
            debug!(
                target: "proctor::assert",
                test = test.0,
                message = report.message.as_deref().unwrap_or(""),
                "assertion failed"
            );
        }
        self.bus.emit(&Event::Assertion(report));
    }

    /// Uncaught error: a failure of the running test, or a global failure between
    /// tests.
    pub(crate) fn report_error(&self, error: &anyhow::Error) {
        let message = error_string(error);
        let current = self.state.borrow().current;
        match current {
            Some(test) => {
                self.push_failure(test, format!("global failure: {message}"), error_stack(error))
            }
            None => {
                {
                    let mut state = self.state.borrow_mut();
                    state.global_failures += 1;
                    state.stats.all += 1;
                    state.stats.bad += 1;
                }
                warn!(target: "proctor::scheduler", error = %message, "uncaught error outside of a test");
                self.bus.emit(&Event::Error(ErrorReport {
                    message,
                    stack: error_stack(error),
                }));
            }
        }
    }

    // ------------------------------------------------------------------
    // run loop
    // ------------------------------------------------------------------

    /// Drains the queue. May be called again after it returns to run tests
    /// registered since; that emits another `RunEnd`.
    pub(crate) async fn run(self: &Rc<Self>) -> Result<RunReport, EngineError> {
        {
            let mut state = self.state.borrow_mut();
            if state.running {
                return Err(EngineError::AlreadyRunning);
            }
            state.running = true;
        }
        let local = LocalSet::new();
        let report = local.run_until(Rc::clone(self).drain()).await;
        self.state.borrow_mut().running = false;
        Ok(report)
    }

    /// Tests registered by `RunEnd` listeners still run in this call, followed by
    /// another `RunEnd`.
    async fn drain(self: Rc<Self>) -> RunReport {
        self.begin_run();
        loop {
            loop {
                let next = self.queue.borrow_mut().pop();
                let Some(test) = next else { break };
                self.run_test(test).await;
            }
            if self.queue_zero_tests_failure() {
                continue;
            }
            let report = self.end_run();
            let late = self.queue.borrow().len();
            if late == 0 {
                return report;
            }
            info!(target: "proctor::scheduler", late, "running tests registered after the run ended");
            self.state.borrow_mut().finished = false;
        }
    }

    fn begin_run(&self) {
        let total = self.queue.borrow().len();
        let first = {
            let mut state = self.state.borrow_mut();
            let first = !state.started;
            state.started = true;
            state.finished = false;
            if first {
                state.run_started = Some(Instant::now());
            }
            state.last_yield = Some(Instant::now());
            first
        };
        if first {
            info!(target: "proctor::scheduler", total, "run started");
            self.bus.emit(&Event::RunStart(RunStartReport { total }));
        } else {
            info!(target: "proctor::scheduler", total, "resuming run for late tests");
        }
    }

    async fn run_test(self: &Rc<Self>, test: TestId) {
        let mut tasks = {
            let model = self.model.borrow();
            let globals = self.global_hooks.borrow();
            task::expand(&model, &globals, test)
        };
        debug!(target: "proctor::scheduler", test = %self.test_name(test), tasks = tasks.len(), "running test");
        while let Some(next) = tasks.pop_front() {
            self.execute(test, next, tasks.len());
            self.settle(test).await;
            self.pace().await;
        }
    }

    /// Waits until `test` holds no pauses, timing it out when its deadline passes.
    async fn settle(&self, test: TestId) {
        loop {
            if !self.state.borrow().blocking {
                return;
            }
            if self.has_pauses(test) {
                self.wait_for_release(test).await;
                continue;
            }
            // Released: let late assertions in before resuming.
            tokio::task::yield_now().await;
            if !self.has_pauses(test) {
                let mut state = self.state.borrow_mut();
                state.blocking = false;
                state.deadline = None;
                return;
            }
        }
    }

    async fn wait_for_release(&self, test: TestId) {
        let deadline = self.state.borrow().deadline;
        match deadline {
            None => self.wake.notified().await,
            Some(deadline) => {
                let waited = tokio::time::timeout_at(deadline.at, self.wake.notified()).await;
                let rearmed = self.state.borrow().deadline.map(|d| d.at) != Some(deadline.at);
                if waited.is_err() && !rearmed {
                    self.time_out(test, deadline.millis);
                }
            }
        }
    }

    fn time_out(&self, test: TestId, millis: u64) {
        warn!(
            target: "proctor::scheduler",
            test = %self.test_name(test),
            timeout_ms = millis,
            "test timed out"
        );
        self.state.borrow_mut().deadline = None;
        self.cancel_pauses(test);
        self.push_failure(
            test,
            format!("Test took longer than {millis}ms; test timed out."),
            None,
        );
    }

    /// Yields to the host runtime at most once per `update_rate`.
    async fn pace(&self) {
        let rate = Duration::from_millis(self.config.update_rate);
        let due = self
            .state
            .borrow()
            .last_yield
            .map_or(true, |at| at.elapsed() >= rate);
        if due {
            tokio::task::yield_now().await;
            self.state.borrow_mut().last_yield = Some(Instant::now());
        }
    }

    /// Queues the synthetic failing test when nothing ran. Returns whether it did.
    fn queue_zero_tests_failure(&self) -> bool {
        if !self.config.fail_on_zero_tests || self.state.borrow().counts.total > 0 {
            return false;
        }
        let message = zero_tests_message(&self.config);
        warn!(target: "proctor::scheduler", %message, "no tests ran");
        let body = model::callback(move |assert| {
            assert
                .push_result(AssertionResult {
                    result: false,
                    message: Some(message.clone()),
                    ..AssertionResult::default()
                })
                .map_err(anyhow::Error::from)
        });
        let id = self.model.borrow_mut().add_test(
            ROOT,
            "global failure",
            Some(body),
            Modifiers::NONE,
            String::new(),
            true,
        );
        self.enqueue(id);
        true
    }

    fn end_run(&self) -> RunReport {
        let report = {
            let mut state = self.state.borrow_mut();
            state.finished = true;
            state.current = None;
            let status = if state.global_failures > 0 {
                Status::Failed
            } else {
                state.counts.status()
            };
            RunReport {
                status,
                test_counts: state.counts,
                stats: state.stats,
                global_failures: state.global_failures,
                runtime_ms: state
                    .run_started
                    .map_or(0, |at| at.elapsed().as_millis() as u64),
            }
        };
        info!(
            target: "proctor::scheduler",
            status = ?report.status,
            total = report.test_counts.total,
            failed = report.test_counts.failed,
            assertions = report.stats.all,
            runtime_ms = report.runtime_ms,
            "run finished"
        );
        self.bus.emit(&Event::RunEnd(report.clone()));
        if report.stats.bad == 0 {
            self.store.borrow_mut().clear_all();
        }
        report
    }

    /// Path of `group` for reports; the root contributes nothing.
    pub(crate) fn suite_path(model: &Model, group: GroupId) -> Vec<String> {
        if group == ROOT {
            Vec::new()
        } else {
            model.path(group)
        }
    }
}

fn zero_tests_message(config: &RunConfig) -> String {
    if let Some(filter) = config.filter.as_deref().filter(|f| !f.is_empty()) {
        format!("No tests matched the filter \"{filter}\".")
    } else if !config.module.is_empty() {
        format!("No tests matched the module \"{}\".", config.module.join(","))
    } else if !config.module_id.is_empty() {
        format!("No tests matched the moduleId \"{}\".", config.module_id.join(","))
    } else if !config.test_id.is_empty() {
        format!("No tests matched the testId \"{}\".", config.test_id.join(","))
    } else {
        "No tests were run.".to_string()
    }
}

pub(crate) fn assertion_report(record: &AssertionRecord) -> AssertionReport {
    let diff = match (&record.actual, &record.expected) {
        (Some(actual), Some(expected)) if !record.result && !record.negative => {
            Some(diff(&dump(expected), &dump(actual)))
        }
        _ => None,
    };
    AssertionReport {
        passed: record.result,
        message: record.message.clone(),
        actual: record.actual.clone(),
        expected: record.expected.clone(),
        negative: record.negative,
        stack: record.source.clone(),
        todo: record.todo,
        runtime_ms: record.runtime_ms,
        diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_zero_tests_messages() {
        assert_eq!(zero_tests_message(&RunConfig::default()), "No tests were run.");
        assert_eq!(
            zero_tests_message(&RunConfig::default().with_filter("abc")),
            "No tests matched the filter \"abc\"."
        );
        assert_eq!(
            zero_tests_message(&RunConfig::default().with_module("a").with_module("b")),
            "No tests matched the module \"a,b\"."
        );
        assert_eq!(
            zero_tests_message(&RunConfig::default().with_test_id("x")),
            "No tests matched the testId \"x\"."
        );
    }

    #[test]
    fn test_failed_comparison_carries_diff() {
        let record = AssertionRecord {
            result: false,
            message: None,
            actual: Some(Value::from("abd")),
            expected: Some(Value::from("abc")),
            negative: false,
            source: None,
            runtime_ms: 0,
            todo: false,
        };
        let report = assertion_report(&record);
        let diff = report.diff.unwrap();
        assert_eq!(crate::diff::text1(&diff), dump(&Value::from("abc")));
        assert_eq!(crate::diff::text2(&diff), dump(&Value::from("abd")));

        let negated = AssertionRecord {
            negative: true,
            ..record
        };
        assert!(assertion_report(&negated).diff.is_none());
    }
}
