//! Group/test/hook data model.
//!
//! Groups and tests live in one arena ([`Model`]) and refer to each other by index.
//! Parent links are plain [`GroupId`]s, so the hierarchy never owns itself.
//!
//! Tests registered outside any named group belong to an implicit unnamed root group.
//! The root is not a parent of named top-level groups and emits no suite events.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::Serialize;

use crate::assert::Assert;
use crate::hash::generate_hash;
use crate::value::Value;

mod group;
mod hooks;
mod test;

pub(crate) use group::{Group, Progress};
pub use hooks::HookKind;
pub(crate) use hooks::HookTable;
pub(crate) use test::{AssertionRecord, Test};

// ============================================================================
// IDS AND MODIFIERS
// ============================================================================

/// Arena index of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(pub(crate) usize);

/// Arena index of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TestId(pub(crate) usize);

/// Registration modifiers shared by groups and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub skip: bool,
    pub todo: bool,
    pub only: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        skip: false,
        todo: false,
        only: false,
    };

    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::NONE
        }
    }

    pub fn todo() -> Self {
        Self {
            todo: true,
            ..Self::NONE
        }
    }

    pub fn only() -> Self {
        Self {
            only: true,
            ..Self::NONE
        }
    }
}

// ============================================================================
// CALLBACKS
// ============================================================================

/// What a hook or test body produced.
pub enum Outcome {
    /// Finished synchronously.
    Done,
    /// Failed synchronously; the equivalent of throwing.
    Threw(anyhow::Error),
    /// Still running. The test is paused until the future settles.
    Pending(LocalBoxFuture<'static, anyhow::Result<()>>),
}

impl Outcome {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        Outcome::Pending(future.boxed_local())
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("Done"),
            Outcome::Threw(error) => f.debug_tuple("Threw").field(error).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Done
    }
}

impl From<anyhow::Result<()>> for Outcome {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Done,
            Err(error) => Outcome::Threw(error),
        }
    }
}

impl From<LocalBoxFuture<'static, anyhow::Result<()>>> for Outcome {
    fn from(future: LocalBoxFuture<'static, anyhow::Result<()>>) -> Self {
        Outcome::Pending(future)
    }
}

/// A hook or test body.
pub type Callback = Rc<dyn Fn(Assert) -> Outcome>;

pub(crate) fn callback<F, O>(f: F) -> Callback
where
    F: Fn(Assert) -> O + 'static,
    O: Into<Outcome>,
{
    Rc::new(move |assert| f(assert).into())
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Shared key/value scratch space.
///
/// Each test starts from a copy of its group's environment; `before` hooks may
/// write into it and have their changes carried back to the group.
#[derive(Clone, Default)]
pub struct Env(Rc<RefCell<BTreeMap<String, Value>>>);

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Shallow copy with its own storage.
    pub(crate) fn fork(&self) -> Env {
        Env(Rc::new(RefCell::new(self.0.borrow().clone())))
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

// ============================================================================
// ARENA
// ============================================================================

pub(crate) struct Model {
    pub(crate) groups: Vec<Group>,
    pub(crate) tests: Vec<Test>,
}

pub(crate) const ROOT: GroupId = GroupId(0);

impl Model {
    pub(crate) fn new() -> Self {
        Self {
            groups: vec![Group::root()],
            tests: Vec::new(),
        }
    }

    pub(crate) fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.0]
    }

    pub(crate) fn test(&self, id: TestId) -> &Test {
        &self.tests[id.0]
    }

    pub(crate) fn test_mut(&mut self, id: TestId) -> &mut Test {
        &mut self.tests[id.0]
    }

    /// Creates a group. Skip and todo are inherited from the parent; a skipped group
    /// is never also todo.
    pub(crate) fn add_group(
        &mut self,
        name: &str,
        parent: Option<GroupId>,
        modifiers: Modifiers,
        ignored: bool,
    ) -> GroupId {
        let id = GroupId(self.groups.len());
        let group = match parent {
            Some(parent_id) => {
                let parent = self.group(parent_id);
                let skip = parent.skip || modifiers.skip;
                let todo = !skip && (parent.todo || modifiers.todo);
                Group::new(
                    name,
                    format!("{} > {}", parent.full_name, name),
                    Some(parent_id),
                    skip,
                    todo,
                    ignored,
                    parent.env.fork(),
                )
            }
            None => Group::new(
                name,
                name.to_string(),
                None,
                modifiers.skip,
                !modifiers.skip && modifiers.todo,
                ignored,
                Env::new(),
            ),
        };
        self.groups.push(group);
        if let Some(parent_id) = parent {
            self.group_mut(parent_id).children.push(id);
        }
        id
    }

    /// Creates a test in `group`, uniquing its name within the group.
    pub(crate) fn add_test(
        &mut self,
        group: GroupId,
        name: &str,
        callback: Option<Callback>,
        modifiers: Modifiers,
        source: String,
        internal: bool,
    ) -> TestId {
        let id = TestId(self.tests.len());
        let owner = self.group(group);

        let mut unique = name.to_string();
        for existing in &owner.tests {
            if self.tests[existing.0].name == unique {
                unique.push(' ');
            }
        }

        let (skip, todo) = if owner.skip {
            (true, false)
        } else {
            (modifiers.skip, modifiers.todo || (owner.todo && !modifiers.skip))
        };
        let test_id = generate_hash(&[owner.full_name.as_str(), unique.as_str()]);
        let test = Test::new(unique, test_id, group, callback, skip, todo, source, internal);
        self.tests.push(test);
        self.group_mut(group).tests.push(id);
        id
    }

    /// `id` and its ancestors, innermost first.
    pub(crate) fn ancestors(&self, id: GroupId) -> Vec<GroupId> {
        let mut chain = vec![id];
        let mut cursor = self.group(id).parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.group(parent).parent;
        }
        chain
    }

    /// Group names from the outermost ancestor down to `id`.
    pub(crate) fn path(&self, id: GroupId) -> Vec<String> {
        self.ancestors(id)
            .into_iter()
            .rev()
            .map(|g| self.group(g).name.clone())
            .collect()
    }

    fn subtree_tests(&self, id: GroupId) -> Vec<TestId> {
        let mut tests = Vec::new();
        let mut pending = VecDeque::from([id]);
        while let Some(group) = pending.pop_front() {
            let group = self.group(group);
            tests.extend(group.tests.iter().copied());
            pending.extend(group.children.iter().copied());
        }
        tests
    }

    pub(crate) fn number_of_tests(&self, id: GroupId) -> usize {
        self.subtree_tests(id).len()
    }

    /// Tests in the subtree that are neither skipped nor dropped by filtering.
    pub(crate) fn number_of_unskipped_tests(&self, id: GroupId) -> usize {
        self.subtree_tests(id)
            .into_iter()
            .filter(|t| {
                let test = self.test(*t);
                !test.skip && !test.ignored
            })
            .count()
    }

    pub(crate) fn all_tests_executed(&self, id: GroupId) -> bool {
        let group = self.group(id);
        group.tests_run + group.tests_ignored == self.number_of_tests(id)
    }

    /// Whether the test currently executing is the group's last unskipped one.
    pub(crate) fn last_test_within_group_executed(&self, id: GroupId) -> bool {
        self.number_of_unskipped_tests(id).checked_sub(1) == Some(self.group(id).tests_run)
    }

    pub(crate) fn increment_tests_run(&mut self, id: GroupId) {
        for group in self.ancestors(id) {
            self.group_mut(group).tests_run += 1;
        }
    }

    pub(crate) fn increment_tests_ignored(&mut self, id: GroupId) {
        for group in self.ancestors(id) {
            self.group_mut(group).tests_ignored += 1;
        }
    }

    /// Groups that have not started yet, outermost first. The root never starts.
    pub(crate) fn not_started_groups(&self, id: GroupId) -> Vec<GroupId> {
        let mut chain: Vec<GroupId> = self
            .ancestors(id)
            .into_iter()
            .take_while(|g| {
                let group = self.group(*g);
                *g != ROOT && group.tests_run == 0 && group.progress.is_none()
            })
            .collect();
        chain.reverse();
        chain
    }

    /// `id` and each ancestor whose subtree has fully executed, innermost first.
    pub(crate) fn completed_groups(&self, id: GroupId) -> Vec<GroupId> {
        if id == ROOT {
            return Vec::new();
        }
        self.ancestors(id)
            .into_iter()
            .take_while(|g| self.all_tests_executed(*g))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(model: &mut Model, group: GroupId, name: &str, modifiers: Modifiers) -> TestId {
        model.add_test(group, name, None, modifiers, String::new(), false)
    }

    #[test]
    fn test_full_names_and_ids() {
        let mut model = Model::new();
        let outer = model.add_group("outer", None, Modifiers::NONE, false);
        let inner = model.add_group("inner", Some(outer), Modifiers::NONE, false);
        assert_eq!(model.group(inner).full_name, "outer > inner");
        assert_eq!(model.group(inner).module_id, generate_hash(&["outer > inner"]));
        assert_eq!(model.path(inner), vec!["outer", "inner"]);

        let t = add(&mut model, inner, "works", Modifiers::NONE);
        assert_eq!(model.test(t).test_id, generate_hash(&["outer > inner", "works"]));
    }

    #[test]
    fn test_duplicate_names_are_uniqued() {
        let mut model = Model::new();
        let g = model.add_group("g", None, Modifiers::NONE, false);
        let a = add(&mut model, g, "same", Modifiers::NONE);
        let b = add(&mut model, g, "same", Modifiers::NONE);
        let c = add(&mut model, g, "same", Modifiers::NONE);
        assert_eq!(model.test(a).name, "same");
        assert_eq!(model.test(b).name, "same ");
        assert_eq!(model.test(c).name, "same  ");
        assert_ne!(model.test(a).test_id, model.test(b).test_id);
    }

    #[test]
    fn test_skip_and_todo_inheritance() {
        let mut model = Model::new();
        let skipped = model.add_group("s", None, Modifiers::skip(), false);
        let todo_child = model.add_group("t", Some(skipped), Modifiers::todo(), false);
        assert!(model.group(todo_child).skip);
        assert!(!model.group(todo_child).todo);

        let t = add(&mut model, todo_child, "x", Modifiers::todo());
        assert!(model.test(t).skip);
        assert!(!model.test(t).todo);

        let todo = model.add_group("todo", None, Modifiers::todo(), false);
        let a = add(&mut model, todo, "a", Modifiers::NONE);
        let b = add(&mut model, todo, "b", Modifiers::skip());
        assert!(model.test(a).todo);
        assert!(model.test(b).skip && !model.test(b).todo);
    }

    #[test]
    fn test_completion_accounting() {
        let mut model = Model::new();
        let outer = model.add_group("outer", None, Modifiers::NONE, false);
        let inner = model.add_group("inner", Some(outer), Modifiers::NONE, false);
        add(&mut model, outer, "a", Modifiers::NONE);
        add(&mut model, inner, "b", Modifiers::NONE);
        add(&mut model, inner, "c", Modifiers::skip());

        assert_eq!(model.number_of_tests(outer), 3);
        assert_eq!(model.number_of_unskipped_tests(outer), 2);
        assert_eq!(model.not_started_groups(inner), vec![outer, inner]);

        model.increment_tests_run(outer);
        assert!(model.last_test_within_group_executed(outer));
        model.increment_tests_run(inner);
        assert_eq!(model.group(outer).tests_run, 2);
        assert!(!model.all_tests_executed(inner));
        model.increment_tests_ignored(inner);
        assert!(model.all_tests_executed(inner));
        assert_eq!(model.completed_groups(inner), vec![inner, outer]);
    }

    #[test]
    fn test_root_is_never_started_or_completed() {
        let mut model = Model::new();
        add(&mut model, ROOT, "loose", Modifiers::NONE);
        assert!(model.not_started_groups(ROOT).is_empty());
        model.increment_tests_run(ROOT);
        assert!(model.completed_groups(ROOT).is_empty());
    }

    #[test]
    fn test_child_env_copies_parent() {
        let mut model = Model::new();
        let outer = model.add_group("outer", None, Modifiers::NONE, false);
        model.group(outer).env.set("x", 1);
        let inner = model.add_group("inner", Some(outer), Modifiers::NONE, false);
        model.group(outer).env.set("y", 2);
        assert_eq!(model.group(inner).env.keys(), vec!["x"]);
    }
}
