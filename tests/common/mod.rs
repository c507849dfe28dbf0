//! # Proctor test support
//!
//! Event recording for integration tests: every event a suite emits is captured in
//! order so tests can assert on the exact stream a reporter would see.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use proctor::events::{Event, EventKind};
use proctor::report::TestEndReport;
use proctor::Suite;

pub const ALL_KINDS: [EventKind; 8] = [
    EventKind::RunStart,
    EventKind::SuiteStart,
    EventKind::TestStart,
    EventKind::Assertion,
    EventKind::TestEnd,
    EventKind::SuiteEnd,
    EventKind::RunEnd,
    EventKind::Error,
];

/// Shared, append-only log.
pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn push(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// Captured events of one suite.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(suite: &Suite) -> Self {
        let recorder = Recorder::default();
        for kind in ALL_KINDS {
            let events = Rc::clone(&recorder.events);
            suite.listen(kind, move |event| events.borrow_mut().push(event.clone()));
        }
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Compact rendering: `testStart:name`, `suiteEnd:group`, `assertion:ok`...
    pub fn outline(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|event| match event {
                Event::RunStart(_) => "runStart".to_string(),
                Event::SuiteStart(s) => format!("suiteStart:{}", s.name),
                Event::TestStart(t) => format!("testStart:{}", t.name),
                Event::Assertion(a) => {
                    format!("assertion:{}", if a.passed { "ok" } else { "fail" })
                }
                Event::TestEnd(t) => format!("testEnd:{}", t.name),
                Event::SuiteEnd(s) => format!("suiteEnd:{}", s.name),
                Event::RunEnd(_) => "runEnd".to_string(),
                Event::Error(e) => format!("error:{}", e.message),
            })
            .collect()
    }

    pub fn test_ends(&self) -> Vec<TestEndReport> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::TestEnd(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn test_end(&self, name: &str) -> TestEndReport {
        self.test_ends()
            .into_iter()
            .find(|report| report.name == name)
            .unwrap_or_else(|| panic!("no testEnd for {name:?}"))
    }

    /// Messages of the failed assertions of `name`.
    pub fn failures(&self, name: &str) -> Vec<String> {
        self.test_end(name)
            .errors
            .iter()
            .map(|a| a.message.clone().unwrap_or_default())
            .collect()
    }

    /// Names of started tests, in execution order.
    pub fn started(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::TestStart(t) => Some(t.name.clone()),
                _ => None,
            })
            .collect()
    }
}
