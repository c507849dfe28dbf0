//! Registration surface: groups, hooks, tests and running them.
//!
//! A [`Suite`] owns one run. Groups are declared with closures; inside the closure
//! every `test`/hook call lands in that group. Tests outside any group belong to an
//! implicit root group that has no hooks of its own and emits no suite events.
//!
//! ```rust
//! use proctor::{RunConfig, Suite};
//!
//! let suite = Suite::new(RunConfig::default());
//! suite.module("math", |s| {
//!     s.before_each(|assert| assert.env().set("two", 2));
//!     s.test("adds", |assert| {
//!         let two = assert.env().get("two").unwrap();
//!         assert.equal(two.as_number().unwrap() + 1.0, 3, "");
//!     });
//! });
//! let report = suite.run_blocking().unwrap();
//! assert!(report.passed());
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::panic::Location;
use std::rc::Rc;

use tracing::debug;

use crate::assert::{Assert, AssertionResult};
use crate::config::RunConfig;
use crate::errors::EngineError;
use crate::events::{Event, EventKind, Listener};
use crate::model::{callback, Callback, GroupId, HookKind, Modifiers, Outcome, TestId, ROOT};
use crate::report::RunReport;
use crate::scheduler::RunContext;
use crate::store::{FailureStore, MemoryStore};

#[derive(Default)]
struct Registration {
    /// Groups whose closures are executing, innermost last.
    stack: Vec<GroupId>,
    focused_groups: bool,
    focused_tests: bool,
}

/// A test suite: registration, listeners and the run.
///
/// Clones share the same suite.
#[derive(Clone)]
pub struct Suite {
    ctx: Rc<RunContext>,
    registration: Rc<RefCell<Registration>>,
}

impl Default for Suite {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

struct StackGuard<'a>(&'a RefCell<Registration>);

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().stack.pop();
    }
}

#[track_caller]
fn caller_source() -> String {
    let location = Location::caller();
    format!("{}:{}:{}", location.file(), location.line(), location.column())
}

impl Suite {
    pub fn new(config: RunConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Suite whose previous-failure records live in `store`.
    pub fn with_store(config: RunConfig, store: impl FailureStore + 'static) -> Self {
        Self {
            ctx: Rc::new(RunContext::new(config, Box::new(store))),
            registration: Rc::new(RefCell::new(Registration::default())),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    /// Subscribes `listener` to `kind`. The same listener is only subscribed once.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        self.ctx.bus.on(kind, listener);
    }

    /// Subscribes a closure and returns it as a [`Listener`].
    pub fn listen<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&Event) + 'static,
    {
        let listener: Listener = Rc::new(f);
        self.on(kind, Rc::clone(&listener));
        listener
    }

    fn current_group(&self) -> GroupId {
        self.registration
            .borrow()
            .stack
            .last()
            .copied()
            .unwrap_or(ROOT)
    }

    // ------------------------------------------------------------------
    // groups
    // ------------------------------------------------------------------

    /// Declares a group nested in the current one and runs `body` inside it.
    pub fn module(&self, name: &str, body: impl FnOnce(&Suite)) -> Option<GroupId> {
        self.module_with(name, Modifiers::NONE, body)
    }

    /// Focuses on this group: everything registered before it is dropped, and later
    /// groups only run if they are nested in a focused one.
    pub fn module_only(&self, name: &str, body: impl FnOnce(&Suite)) -> Option<GroupId> {
        self.module_with(name, Modifiers::only(), body)
    }

    pub fn module_skip(&self, name: &str, body: impl FnOnce(&Suite)) -> Option<GroupId> {
        self.module_with(name, Modifiers::skip(), body)
    }

    pub fn module_todo(&self, name: &str, body: impl FnOnce(&Suite)) -> Option<GroupId> {
        self.module_with(name, Modifiers::todo(), body)
    }

    /// A group that is skipped unless `condition` holds.
    pub fn module_if(
        &self,
        name: &str,
        condition: bool,
        body: impl FnOnce(&Suite),
    ) -> Option<GroupId> {
        let modifiers = if condition {
            Modifiers::NONE
        } else {
            Modifiers::skip()
        };
        self.module_with(name, modifiers, body)
    }

    fn module_with(
        &self,
        name: &str,
        modifiers: Modifiers,
        body: impl FnOnce(&Suite),
    ) -> Option<GroupId> {
        let parent = self.registration.borrow().stack.last().copied();
        let group = self.create_group(name, parent, modifiers)?;
        self.registration.borrow_mut().stack.push(group);
        let _guard = StackGuard(&self.registration);
        body(self);
        Some(group)
    }

    /// Creates a group without entering it. `parent` of `None` makes a top-level
    /// group. Returns `None` for skip/todo groups declared while focus is active.
    pub fn create_group(
        &self,
        name: &str,
        parent: Option<GroupId>,
        modifiers: Modifiers,
    ) -> Option<GroupId> {
        let ignored = {
            let mut registration = self.registration.borrow_mut();
            if modifiers.only {
                if !registration.focused_groups {
                    self.ctx.drop_queued();
                    for group in self.ctx.model.borrow_mut().groups.iter_mut() {
                        group.ignored = true;
                    }
                }
                registration.focused_groups = true;
                false
            } else {
                if registration.focused_groups && (modifiers.skip || modifiers.todo) {
                    return None;
                }
                registration.focused_groups && !self.parent_in_focus(parent)
            }
        };
        let group = self
            .ctx
            .model
            .borrow_mut()
            .add_group(name, parent, modifiers, ignored);
        debug!(target: "proctor::suite", group = name, ignored, "group registered");
        Some(group)
    }

    fn parent_in_focus(&self, parent: Option<GroupId>) -> bool {
        let Some(parent) = parent else {
            return false;
        };
        let model = self.ctx.model.borrow();
        model
            .ancestors(parent)
            .into_iter()
            .any(|g| !model.group(g).ignored)
    }

    // ------------------------------------------------------------------
    // hooks
    // ------------------------------------------------------------------

    /// Registers a hook on `group`.
    pub fn hook<F, O>(&self, group: GroupId, kind: HookKind, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.ctx
            .model
            .borrow_mut()
            .group_mut(group)
            .hooks
            .push(kind, callback(f));
    }

    /// Runs once before the first test of the current group.
    pub fn before<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.hook(self.current_group(), HookKind::Before, f);
    }

    pub fn before_each<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.hook(self.current_group(), HookKind::BeforeEach, f);
    }

    pub fn after_each<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.hook(self.current_group(), HookKind::AfterEach, f);
    }

    /// Runs once after the last test of the current group.
    pub fn after<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.hook(self.current_group(), HookKind::After, f);
    }

    /// Runs before every test of the suite, ahead of group hooks.
    pub fn global_before_each<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.ctx
            .global_hooks
            .borrow_mut()
            .push(HookKind::BeforeEach, callback(f));
    }

    /// Runs after every test of the suite, after group hooks.
    pub fn global_after_each<F, O>(&self, f: F)
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        self.ctx
            .global_hooks
            .borrow_mut()
            .push(HookKind::AfterEach, callback(f));
    }

    // ------------------------------------------------------------------
    // tests
    // ------------------------------------------------------------------

    #[track_caller]
    pub fn test<F, O>(&self, name: &str, f: F) -> Option<TestId>
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        let source = caller_source();
        self.register(self.current_group(), name, Some(callback(f)), Modifiers::NONE, source)
    }

    /// A test whose body is async; the test is paused until the future settles.
    #[track_caller]
    pub fn test_async<F, Fut>(&self, name: &str, f: F) -> Option<TestId>
    where
        F: Fn(Assert) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let source = caller_source();
        let body = callback(move |assert| Outcome::pending(f(assert)));
        self.register(self.current_group(), name, Some(body), Modifiers::NONE, source)
    }

    /// Focuses on this test: everything queued before it is dropped and later
    /// non-focused tests are not registered.
    #[track_caller]
    pub fn test_only<F, O>(&self, name: &str, f: F) -> Option<TestId>
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        let source = caller_source();
        self.register(self.current_group(), name, Some(callback(f)), Modifiers::only(), source)
    }

    /// A test expected to fail: it passes when at least one assertion fails.
    #[track_caller]
    pub fn test_todo<F, O>(&self, name: &str, f: F) -> Option<TestId>
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        let source = caller_source();
        self.register(self.current_group(), name, Some(callback(f)), Modifiers::todo(), source)
    }

    #[track_caller]
    pub fn test_skip(&self, name: &str) -> Option<TestId> {
        let source = caller_source();
        self.register(self.current_group(), name, None, Modifiers::skip(), source)
    }

    /// A test that is skipped unless `condition` holds.
    #[track_caller]
    pub fn test_if<F, O>(&self, name: &str, condition: bool, f: F) -> Option<TestId>
    where
        F: Fn(Assert) -> O + 'static,
        O: Into<Outcome>,
    {
        let source = caller_source();
        let modifiers = if condition {
            Modifiers::NONE
        } else {
            Modifiers::skip()
        };
        self.register(self.current_group(), name, Some(callback(f)), modifiers, source)
    }

    /// One test per case, named `"<name> [<index>]"`.
    #[track_caller]
    pub fn test_each<D, I, F, O>(&self, name: &str, cases: I, f: F) -> Vec<TestId>
    where
        I: IntoIterator<Item = D>,
        D: Clone + 'static,
        F: Fn(Assert, D) -> O + 'static,
        O: Into<Outcome>,
    {
        let source = caller_source();
        let group = self.current_group();
        let f = Rc::new(f);
        cases
            .into_iter()
            .enumerate()
            .filter_map(|(index, data)| {
                let f = Rc::clone(&f);
                let body = callback(move |assert| f(assert, data.clone()));
                self.register(
                    group,
                    &format!("{name} [{index}]"),
                    Some(body),
                    Modifiers::NONE,
                    source.clone(),
                )
            })
            .collect()
    }

    /// Registers a test in `group`. A missing callback on a test that is not
    /// skipped registers a test that fails.
    #[track_caller]
    pub fn register_test(
        &self,
        group: GroupId,
        name: &str,
        callback: Option<Callback>,
        modifiers: Modifiers,
    ) -> Option<TestId> {
        let source = caller_source();
        self.register(group, name, callback, modifiers, source)
    }

    fn register(
        &self,
        group: GroupId,
        name: &str,
        body: Option<Callback>,
        modifiers: Modifiers,
        source: String,
    ) -> Option<TestId> {
        let (ignored, group_skipped) = {
            let model = self.ctx.model.borrow();
            let owner = model.group(group);
            (owner.ignored, owner.skip)
        };
        {
            let mut registration = self.registration.borrow_mut();
            if modifiers.only {
                if ignored {
                    return None;
                }
                if !registration.focused_tests {
                    self.ctx.drop_queued();
                    registration.focused_tests = true;
                }
            } else if registration.focused_tests || ignored {
                return None;
            }
        }

        let missing = body.is_none() && !modifiers.skip && !group_skipped;
        let test = {
            let mut model = self.ctx.model.borrow_mut();
            let test = model.add_test(group, name, body, modifiers, source, false);
            if missing {
                // A registration error fails the test even in todo mode.
                let t = model.test_mut(test);
                t.callback = Some(missing_callback(name, t.todo));
                t.todo = false;
            }
            test
        };
        debug!(target: "proctor::suite", test = name, "test registered");
        self.ctx.enqueue(test);
        Some(test)
    }

    // ------------------------------------------------------------------
    // running
    // ------------------------------------------------------------------

    /// Reports an uncaught error: it fails the running test, or counts as a global
    /// failure when no test is running.
    pub fn report_error(&self, error: &anyhow::Error) {
        self.ctx.report_error(error);
    }

    /// Runs every queued test. Must be awaited on a current-thread runtime with time
    /// enabled.
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        self.ctx.run().await
    }

    /// Runs the suite on a fresh current-thread runtime.
    pub fn run_blocking(&self) -> Result<RunReport, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run())
    }
}

fn missing_callback(name: &str, todo: bool) -> Callback {
    let call = if todo { "todo" } else { "test" };
    let message = format!("You must provide a callback to {call}(\"{name}\")");
    callback(move |assert: Assert| {
        assert
            .push_result(AssertionResult {
                result: false,
                message: Some(message.clone()),
                ..AssertionResult::default()
            })
            .map_err(anyhow::Error::from)
    })
}
