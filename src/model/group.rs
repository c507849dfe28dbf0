use std::time::Instant;

use super::{Env, GroupId, HookTable, TestId};
use crate::hash::generate_hash;
use crate::report::{AssertionStats, TestCounts};

/// A named group of tests and child groups.
pub(crate) struct Group {
    pub(crate) name: String,
    /// Ancestor names and own name joined with `" > "`.
    pub(crate) full_name: String,
    pub(crate) module_id: String,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) tests: Vec<TestId>,
    pub(crate) hooks: HookTable,
    pub(crate) skip: bool,
    pub(crate) todo: bool,
    /// Excluded by focus mode: none of its tests are valid.
    pub(crate) ignored: bool,
    pub(crate) tests_run: usize,
    pub(crate) tests_ignored: usize,
    pub(crate) env: Env,
    /// Set when the group's suite starts.
    pub(crate) progress: Option<Progress>,
}

/// Running totals of a started group.
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    pub(crate) started: Instant,
    pub(crate) stats: AssertionStats,
    pub(crate) counts: TestCounts,
}

impl Progress {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            stats: AssertionStats::default(),
            counts: TestCounts::default(),
        }
    }
}

impl Group {
    pub(crate) fn new(
        name: &str,
        full_name: String,
        parent: Option<GroupId>,
        skip: bool,
        todo: bool,
        ignored: bool,
        env: Env,
    ) -> Self {
        Self {
            name: name.to_string(),
            module_id: generate_hash(&[full_name.as_str()]),
            full_name,
            parent,
            children: Vec::new(),
            tests: Vec::new(),
            hooks: HookTable::default(),
            skip,
            todo,
            ignored,
            tests_run: 0,
            tests_ignored: 0,
            env,
            progress: None,
        }
    }

    pub(crate) fn root() -> Self {
        Self::new("", String::new(), None, false, false, false, Env::new())
    }
}
