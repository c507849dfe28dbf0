use std::fmt;

use serde::Serialize;

use super::Callback;

/// The four hook slots of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    /// Once, before the first test of the group.
    Before,
    /// Before every test, parents first.
    BeforeEach,
    /// After every test, children first.
    AfterEach,
    /// Once, after the last test of the group.
    After,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterEach => "afterEach",
            HookKind::After => "after",
        }
    }

    /// Word used in "Promise rejected ..." messages.
    pub(crate) fn phase(&self) -> &'static str {
        match self {
            HookKind::Before | HookKind::BeforeEach => "before",
            HookKind::AfterEach | HookKind::After => "after",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook callbacks of one group (or of the global registry), in registration order.
#[derive(Default, Clone)]
pub(crate) struct HookTable {
    before: Vec<Callback>,
    before_each: Vec<Callback>,
    after_each: Vec<Callback>,
    after: Vec<Callback>,
}

impl HookTable {
    pub(crate) fn get(&self, kind: HookKind) -> &[Callback] {
        match kind {
            HookKind::Before => &self.before,
            HookKind::BeforeEach => &self.before_each,
            HookKind::AfterEach => &self.after_each,
            HookKind::After => &self.after,
        }
    }

    pub(crate) fn push(&mut self, kind: HookKind, callback: Callback) {
        match kind {
            HookKind::Before => self.before.push(callback),
            HookKind::BeforeEach => self.before_each.push(callback),
            HookKind::AfterEach => self.after_each.push(callback),
            HookKind::After => self.after.push(callback),
        }
    }

    /// Drops every callback, releasing whatever they captured.
    pub(crate) fn clear(&mut self) {
        *self = HookTable::default();
    }
}
