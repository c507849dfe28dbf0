//! Per-test task list and the execution of each task.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Instant;

use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use super::{assertion_report, RunContext};
use crate::assert::Assert;
use crate::errors::{error_stack, error_string, panic_message};
use crate::events::Event;
use crate::model::{Callback, GroupId, HookKind, HookTable, Model, Outcome, Progress, TestId};
use crate::report::{
    AssertionStats, Status, SuiteEndReport, SuiteStartReport, TestEndReport, TestStartReport,
};

/// One step of running a test.
#[derive(Clone)]
pub(super) enum Task {
    /// Starts suites and the test, emits the start events.
    Before,
    /// A hook of `owner`, or a global hook when `owner` is `None`.
    Hook {
        owner: Option<GroupId>,
        kind: HookKind,
        callback: Callback,
    },
    /// Carries the environment written by `before` hooks back to the group.
    PreserveEnvironment,
    Body,
    CheckPollution,
    Finish,
}

/// Expands `test` into its tasks.
///
/// Order: `before` hooks outermost group first, global then group `beforeEach`
/// outermost first, the body, then `afterEach` and `after` innermost first. Skipped
/// tests run no hooks.
pub(super) fn expand(model: &Model, global: &HookTable, test: TestId) -> VecDeque<Task> {
    let t = model.test(test);
    let mut tasks = VecDeque::from([Task::Before]);
    if !t.skip {
        let mut lineage = model.ancestors(t.group);
        lineage.reverse();

        push_hooks(&mut tasks, model, &lineage, HookKind::Before);
        tasks.push_back(Task::PreserveEnvironment);
        for callback in global.get(HookKind::BeforeEach) {
            tasks.push_back(Task::Hook {
                owner: None,
                kind: HookKind::BeforeEach,
                callback: callback.clone(),
            });
        }
        push_hooks(&mut tasks, model, &lineage, HookKind::BeforeEach);
    }
    tasks.push_back(Task::Body);
    if !t.skip {
        let lineage = model.ancestors(t.group);
        push_hooks(&mut tasks, model, &lineage, HookKind::AfterEach);
        for callback in global.get(HookKind::AfterEach).iter().rev() {
            tasks.push_back(Task::Hook {
                owner: None,
                kind: HookKind::AfterEach,
                callback: callback.clone(),
            });
        }
        push_hooks(&mut tasks, model, &lineage, HookKind::After);
    }
    tasks.push_back(Task::CheckPollution);
    tasks.push_back(Task::Finish);
    tasks
}

/// Appends the `kind` hooks of every group in `lineage`, in lineage order. Hooks of
/// one group keep their registration order for `before`/`beforeEach` and run in
/// reverse for `afterEach`/`after`.
fn push_hooks(tasks: &mut VecDeque<Task>, model: &Model, lineage: &[GroupId], kind: HookKind) {
    for group in lineage {
        let hooks = model.group(*group).hooks.get(kind);
        let ordered: Box<dyn Iterator<Item = &Callback>> = match kind {
            HookKind::Before | HookKind::BeforeEach => Box::new(hooks.iter()),
            HookKind::AfterEach | HookKind::After => Box::new(hooks.iter().rev()),
        };
        for callback in ordered {
            tasks.push_back(Task::Hook {
                owner: Some(*group),
                kind,
                callback: callback.clone(),
            });
        }
    }
}

/// What a callback was run as; decides how its failures are worded.
#[derive(Debug, Clone, Copy)]
pub(super) enum Phase {
    Body,
    Hook(HookKind),
    GlobalHook(HookKind),
}

impl Phase {
    fn word(self) -> &'static str {
        match self {
            Phase::Body => "during",
            Phase::Hook(kind) | Phase::GlobalHook(kind) => kind.phase(),
        }
    }
}

impl RunContext {
    pub(super) fn execute(self: &Rc<Self>, test: TestId, task: Task, remaining: usize) {
        match task {
            Task::Before => self.start_test(test),
            Task::Hook {
                owner,
                kind,
                callback,
            } => self.run_hook(test, owner, kind, &callback, remaining),
            Task::PreserveEnvironment => self.preserve_environment(test),
            Task::Body => self.run_body(test),
            Task::CheckPollution => self.check_pollution(test),
            Task::Finish => self.finish_test(test),
        }
    }

    fn start_test(&self, test: TestId) {
        let suites = {
            let mut model = self.model.borrow_mut();
            let group = model.test(test).group;
            let mut reports = Vec::new();
            for g in model.not_started_groups(group) {
                let total = model.number_of_tests(g);
                model.group_mut(g).progress = Some(Progress::start());
                reports.push(SuiteStartReport {
                    name: model.group(g).name.clone(),
                    full_name: model.path(g),
                    total,
                });
            }
            reports
        };
        for report in suites {
            debug!(target: "proctor::scheduler", suite = %report.name, "suite started");
            self.bus.emit(&Event::SuiteStart(report));
        }

        self.state.borrow_mut().current = Some(test);
        let report = {
            let mut model = self.model.borrow_mut();
            let group = model.test(test).group;
            let env = model.group(group).env.fork();
            let suite_name = model.group(group).name.clone();
            let mut full_name = Self::suite_path(&model, group);
            let t = model.test_mut(test);
            t.env = env;
            t.started = Some(Instant::now());
            full_name.push(t.name.clone());
            TestStartReport {
                name: t.name.clone(),
                test_id: t.test_id.clone(),
                suite_name,
                full_name,
                previous_failure: t.previous_failure,
            }
        };
        self.bus.emit(&Event::TestStart(report));
        self.save_globals();
    }

    fn save_globals(&self) {
        if self.config.no_globals {
            self.state.borrow_mut().saved_globals = self.globals.keys();
        }
    }

    fn run_hook(
        self: &Rc<Self>,
        test: TestId,
        owner: Option<GroupId>,
        kind: HookKind,
        callback: &Callback,
        remaining: usize,
    ) {
        if let Some(owner) = owner {
            match kind {
                HookKind::Before => {
                    let mut model = self.model.borrow_mut();
                    if model.group(owner).tests_run != 0 {
                        return;
                    }
                    model.test_mut(test).preserve_env = true;
                }
                // More tasks than CheckPollution and Finish remain, or more tests
                // are queued: the group is not done yet.
                HookKind::After => {
                    let last = self.model.borrow().last_test_within_group_executed(owner);
                    if !last && (!self.queue.borrow().is_empty() || remaining > 2) {
                        return;
                    }
                }
                HookKind::BeforeEach | HookKind::AfterEach => {}
            }
        }
        self.state.borrow_mut().current = Some(test);
        let phase = match owner {
            Some(_) => Phase::Hook(kind),
            None => Phase::GlobalHook(kind),
        };
        self.invoke(test, callback, phase);
    }

    fn preserve_environment(&self, test: TestId) {
        let mut model = self.model.borrow_mut();
        let t = model.test(test);
        if !t.preserve_env {
            return;
        }
        let (group, env) = (t.group, t.env.clone());
        model.test_mut(test).env = env.fork();
        model.group_mut(group).env = env;
    }

    fn run_body(self: &Rc<Self>, test: TestId) {
        self.state.borrow_mut().current = Some(test);
        let callback = self.model.borrow().test(test).callback.clone();
        if let Some(callback) = callback {
            self.invoke(test, &callback, Phase::Body);
        }
        let (timeout, paused) = {
            let model = self.model.borrow();
            let t = model.test(test);
            (t.timeout, !t.pauses.is_empty())
        };
        if timeout == Some(0) && paused {
            self.push_failure(
                test,
                "Test did not finish synchronously even though assert.timeout( 0 ) was used."
                    .to_string(),
                None,
            );
            self.recover(test);
        }
    }

    fn invoke(self: &Rc<Self>, test: TestId, callback: &Callback, phase: Phase) {
        let assert = Assert::new(test, Rc::clone(self));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(assert)))
            .unwrap_or_else(|payload| Outcome::Threw(anyhow!(panic_message(payload.as_ref()))));
        match outcome {
            Outcome::Done => {}
            Outcome::Threw(error) => self.callback_failed(test, phase, &error),
            Outcome::Pending(future) => self.await_pending(test, phase, future),
        }
    }

    fn callback_failed(&self, test: TestId, phase: Phase, error: &anyhow::Error) {
        let message = error_string(error);
        let (name, number, source) = {
            let model = self.model.borrow();
            let t = model.test(test);
            (t.name.clone(), t.assertions.len() + 1, t.source.clone())
        };
        let text = match phase {
            Phase::Body if source.is_empty() => format!("Died on test #{number}: {message}"),
            Phase::Body => format!("Died on test #{number} {source}: {message}"),
            Phase::Hook(kind) => format!("{kind} failed on {name}: {message}"),
            Phase::GlobalHook(kind) => format!("Global {kind} failed on {name}: {message}"),
        };
        warn!(target: "proctor::scheduler", test = %name, phase = ?phase, error = %message, "callback failed");
        self.push_failure(test, text, error_stack(error));
        if let Phase::Body = phase {
            self.save_globals();
            if self.has_pauses(test) {
                self.recover(test);
            }
        }
    }

    /// Pauses the test until `future` settles. A rejection fails the test and
    /// cancels its other pauses.
    fn await_pending(
        self: &Rc<Self>,
        test: TestId,
        phase: Phase,
        future: LocalBoxFuture<'static, anyhow::Result<()>>,
    ) {
        let release = match self.internal_stop(test, 1) {
            Ok(release) => release,
            Err(err) => {
                warn!(target: "proctor::pause", error = %err, "future returned outside its test");
                return;
            }
        };
        let ctx = Rc::clone(self);
        let handle = tokio::task::spawn_local(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {
                    if let Err(err) = release.release() {
                        warn!(target: "proctor::pause", error = %err, "future settled too late");
                    }
                }
                Ok(Err(error)) => {
                    ctx.future_rejected(test, phase, error_string(&error), error_stack(&error))
                }
                Err(payload) => {
                    ctx.future_rejected(test, phase, panic_message(payload.as_ref()), None)
                }
            }
        });
        self.track_spawned(handle);
    }

    /// Work started with `Assert::spawn` failed. Outside its own test the failure
    /// is reported as an uncaught error.
    pub(crate) fn spawned_failed(&self, test: TestId, error: &anyhow::Error) {
        let current = self.state.borrow().current;
        if current == Some(test) {
            self.callback_failed(test, Phase::Body, error);
        } else {
            self.report_error(error);
        }
    }

    fn future_rejected(&self, test: TestId, phase: Phase, message: String, stack: Option<String>) {
        let name = self.test_name(test);
        warn!(target: "proctor::scheduler", test = %name, phase = ?phase, error = %message, "future rejected");
        self.push_failure(
            test,
            format!("Promise rejected {} \"{}\": {}", phase.word(), name, message),
            stack,
        );
        self.save_globals();
        self.recover(test);
    }

    fn check_pollution(&self, test: TestId) {
        if !self.config.no_globals {
            return;
        }
        let before = std::mem::take(&mut self.state.borrow_mut().saved_globals);
        let after = self.globals.keys();
        let added: Vec<&str> = after
            .iter()
            .filter(|k| !before.contains(k))
            .map(String::as_str)
            .collect();
        let deleted: Vec<&str> = before
            .iter()
            .filter(|k| !after.contains(k))
            .map(String::as_str)
            .collect();
        if !added.is_empty() {
            self.push_failure(
                test,
                format!("Introduced global variable(s): {}", added.join(", ")),
                None,
            );
        }
        if !deleted.is_empty() {
            self.push_failure(
                test,
                format!("Deleted global variable(s): {}", deleted.join(", ")),
                None,
            );
        }
    }

    fn finish_test(&self, test: TestId) {
        self.state.borrow_mut().current = Some(test);
        let spawned = std::mem::take(&mut self.state.borrow_mut().spawned);
        for handle in spawned {
            handle.abort();
        }
        self.check_expectations(test);

        let (report, group, test_id, stats, status) = {
            let mut model = self.model.borrow_mut();
            let t = model.test_mut(test);
            t.runtime_ms = t.elapsed_ms();
            let stats = AssertionStats {
                all: t.assertions.len(),
                bad: t.failed_assertions(),
            };
            let status = Status::of_test(t.skip, t.todo, stats.bad);
            let (group, skip, test_id) = (t.group, t.skip, t.test_id.clone());
            if skip {
                model.increment_tests_ignored(group);
            } else {
                model.increment_tests_run(group);
            }
            for g in model.ancestors(group) {
                if let Some(progress) = model.group_mut(g).progress.as_mut() {
                    progress.counts.record(status);
                    progress.stats.all += stats.all;
                    progress.stats.bad += stats.bad;
                }
            }
            let report = test_end_report(&model, test, status);
            (report, group, test_id, stats, status)
        };
        {
            let mut state = self.state.borrow_mut();
            state.stats.all += stats.all;
            state.stats.bad += stats.bad;
            state.counts.record(status);
        }
        {
            let mut store = self.store.borrow_mut();
            if stats.bad > 0 {
                store.record_failure(&test_id, stats.bad);
            } else {
                store.clear(&test_id);
            }
        }
        debug!(
            target: "proctor::scheduler",
            test = %report.name,
            status = ?status,
            assertions = stats.all,
            failed = stats.bad,
            "test finished"
        );
        self.bus.emit(&Event::TestEnd(report));
        self.model.borrow_mut().test_mut(test).slim_assertions();

        let completed = self.model.borrow().completed_groups(group);
        for g in completed {
            let report = {
                let mut model = self.model.borrow_mut();
                model.group_mut(g).hooks.clear();
                suite_end_report(&model, g)
            };
            debug!(target: "proctor::scheduler", suite = %report.name, status = ?report.status, "suite finished");
            self.bus.emit(&Event::SuiteEnd(report));
        }
        self.state.borrow_mut().current = None;
    }

    /// Unverified steps, and the declared (or required) assertion count.
    fn check_expectations(&self, test: TestId) {
        let (steps, source) = {
            let model = self.model.borrow();
            let t = model.test(test);
            (t.steps.clone(), t.source.clone())
        };
        let source = (!source.is_empty()).then_some(source);
        if !steps.is_empty() {
            self.push_failure(
                test,
                format!(
                    "Expected assert.verify_steps() to be called before end of test after using \
                     assert.step(). Unverified steps: {}",
                    steps.join(", ")
                ),
                source.clone(),
            );
        }

        let (expected, count) = {
            let model = self.model.borrow();
            let t = model.test(test);
            (t.expected, t.assertions.len())
        };
        let message = match expected {
            None if self.config.require_expects => Some(
                "Expected number of assertions to be defined, but expect() was not called."
                    .to_string(),
            ),
            Some(n) if n != count => Some(format!("Expected {n} assertions, but {count} were run")),
            None if count == 0 => Some(
                "Expected at least one assertion, but none were run - call expect(0) to accept \
                 zero assertions."
                    .to_string(),
            ),
            _ => None,
        };
        if let Some(message) = message {
            self.push_failure(test, message, source);
        }
    }
}

fn test_end_report(model: &Model, test: TestId, status: Status) -> TestEndReport {
    let t = model.test(test);
    let mut full_name = RunContext::suite_path(model, t.group);
    full_name.push(t.name.clone());
    let assertions: Vec<_> = t.assertions.iter().map(assertion_report).collect();
    TestEndReport {
        name: t.name.clone(),
        test_id: t.test_id.clone(),
        suite_name: model.group(t.group).name.clone(),
        full_name,
        status,
        runtime_ms: t.runtime_ms,
        errors: assertions.iter().filter(|a| !a.passed).cloned().collect(),
        assertions,
    }
}

fn suite_end_report(model: &Model, group: GroupId) -> SuiteEndReport {
    let g = model.group(group);
    let (counts, stats, runtime_ms) = match &g.progress {
        Some(progress) => (
            progress.counts,
            progress.stats,
            progress.started.elapsed().as_millis() as u64,
        ),
        None => Default::default(),
    };
    SuiteEndReport {
        name: g.name.clone(),
        full_name: model.path(group),
        status: counts.status(),
        test_counts: counts,
        stats,
        runtime_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{callback, Modifiers, ROOT};

    fn names(model: &Model, tasks: &VecDeque<Task>) -> Vec<String> {
        tasks
            .iter()
            .map(|task| match task {
                Task::Before => "Before".to_string(),
                Task::Hook { owner, kind, .. } => match owner {
                    Some(g) => format!("{}:{}", model.group(*g).name, kind),
                    None => format!("global:{kind}"),
                },
                Task::PreserveEnvironment => "Preserve".to_string(),
                Task::Body => "Body".to_string(),
                Task::CheckPollution => "Pollution".to_string(),
                Task::Finish => "Finish".to_string(),
            })
            .collect()
    }

    fn hooked_model() -> (Model, HookTable, TestId, TestId) {
        let mut model = Model::new();
        let outer = model.add_group("outer", None, Modifiers::NONE, false);
        let inner = model.add_group("inner", Some(outer), Modifiers::NONE, false);
        for group in [outer, inner] {
            for kind in [HookKind::Before, HookKind::BeforeEach, HookKind::AfterEach, HookKind::After] {
                model.group_mut(group).hooks.push(kind, callback(|_| ()));
            }
        }
        let mut global = HookTable::default();
        global.push(HookKind::BeforeEach, callback(|_| ()));
        global.push(HookKind::AfterEach, callback(|_| ()));
        let t = model.add_test(inner, "t", None, Modifiers::NONE, String::new(), false);
        let skipped = model.add_test(inner, "s", None, Modifiers::skip(), String::new(), false);
        (model, global, t, skipped)
    }

    #[test]
    fn test_expansion_order() {
        let (model, global, t, _) = hooked_model();
        let tasks = expand(&model, &global, t);
        assert_eq!(
            names(&model, &tasks),
            vec![
                "Before",
                "outer:before",
                "inner:before",
                "Preserve",
                "global:beforeEach",
                "outer:beforeEach",
                "inner:beforeEach",
                "Body",
                "inner:afterEach",
                "outer:afterEach",
                "global:afterEach",
                "inner:after",
                "outer:after",
                "Pollution",
                "Finish",
            ]
        );
    }

    #[test]
    fn test_skipped_tests_run_no_hooks() {
        let (model, global, _, skipped) = hooked_model();
        let tasks = expand(&model, &global, skipped);
        assert_eq!(names(&model, &tasks), vec!["Before", "Body", "Pollution", "Finish"]);
    }

    #[test]
    fn test_root_tests_see_global_hooks_only() {
        let mut model = Model::new();
        let mut global = HookTable::default();
        global.push(HookKind::BeforeEach, callback(|_| ()));
        let t = model.add_test(ROOT, "loose", None, Modifiers::NONE, String::new(), false);
        let tasks = expand(&model, &global, t);
        assert_eq!(
            names(&model, &tasks),
            vec!["Before", "Preserve", "global:beforeEach", "Body", "Pollution", "Finish"]
        );
    }

    #[test]
    fn test_hooks_within_group_keep_order() {
        let mut model = Model::new();
        let g = model.add_group("g", None, Modifiers::NONE, false);
        let t = model.add_test(g, "t", None, Modifiers::NONE, String::new(), false);
        model.group_mut(g).hooks.push(HookKind::AfterEach, callback(|_| ()));
        model.group_mut(g).hooks.push(HookKind::AfterEach, callback(|_| ()));
        let tasks = expand(&model, &HookTable::default(), t);
        let hooks: Vec<*const ()> = tasks
            .iter()
            .filter_map(|task| match task {
                Task::Hook { callback, .. } => Some(Rc::as_ptr(callback) as *const ()),
                _ => None,
            })
            .collect();
        let registered = model.group(g).hooks.get(HookKind::AfterEach);
        assert_eq!(hooks[0], Rc::as_ptr(&registered[1]) as *const ());
        assert_eq!(hooks[1], Rc::as_ptr(&registered[0]) as *const ());
    }
}
