//! Event bus between the engine and reporters.
//!
//! Listeners subscribe per [`EventKind`] and are invoked synchronously, in
//! registration order, with an immutable snapshot. Subscribing the same listener
//! (`Rc::ptr_eq`) twice for one kind has no effect.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use tracing::trace;

use crate::report::{
    AssertionReport, ErrorReport, RunReport, RunStartReport, SuiteEndReport, SuiteStartReport,
    TestEndReport, TestStartReport,
};

/// Event names listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    RunStart,
    SuiteStart,
    TestStart,
    Assertion,
    TestEnd,
    SuiteEnd,
    RunEnd,
    Error,
}

/// An emitted event and its snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Event {
    RunStart(RunStartReport),
    SuiteStart(SuiteStartReport),
    TestStart(TestStartReport),
    Assertion(AssertionReport),
    TestEnd(TestEndReport),
    SuiteEnd(SuiteEndReport),
    RunEnd(RunReport),
    /// An uncaught error reported while no test was running.
    Error(ErrorReport),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RunStart(_) => EventKind::RunStart,
            Event::SuiteStart(_) => EventKind::SuiteStart,
            Event::TestStart(_) => EventKind::TestStart,
            Event::Assertion(_) => EventKind::Assertion,
            Event::TestEnd(_) => EventKind::TestEnd,
            Event::SuiteEnd(_) => EventKind::SuiteEnd,
            Event::RunEnd(_) => EventKind::RunEnd,
            Event::Error(_) => EventKind::Error,
        }
    }
}

pub type Listener = Rc<dyn Fn(&Event)>;

#[derive(Default)]
pub(crate) struct EventBus {
    listeners: RefCell<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBus {
    pub(crate) fn on(&self, kind: EventKind, listener: Listener) {
        let mut listeners = self.listeners.borrow_mut();
        let slot = listeners.entry(kind).or_default();
        if !slot.iter().any(|existing| Rc::ptr_eq(existing, &listener)) {
            slot.push(listener);
        }
    }

    /// Invokes every listener for the event's kind. The listener list is copied
    /// first, so listeners may subscribe further listeners.
    pub(crate) fn emit(&self, event: &Event) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        trace!(target: "proctor::events", ?kind, listeners = listeners.len(), "emit");
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn error_event(message: &str) -> Event {
        Event::Error(ErrorReport {
            message: message.to_string(),
            stack: None,
        })
    }

    #[test]
    fn test_listeners_run_in_order_per_kind() {
        let bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = log.clone();
            bus.on(EventKind::Error, Rc::new(move |_: &Event| log.borrow_mut().push(tag)));
        }
        let other = log.clone();
        bus.on(EventKind::RunStart, Rc::new(move |_: &Event| other.borrow_mut().push("run")));

        bus.emit(&error_event("x"));
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_listener_is_ignored() {
        let bus = EventBus::default();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let listener: Listener = Rc::new(move |_: &Event| counter.set(counter.get() + 1));
        bus.on(EventKind::Error, listener.clone());
        bus.on(EventKind::Error, listener.clone());
        bus.on(EventKind::RunEnd, listener);

        bus.emit(&error_event("x"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(error_event("boom")).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "boom");
    }
}
