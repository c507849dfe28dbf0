//! Async pauses: the only way a test yields control back to the scheduler.
//!
//! A pause is created with a number of required releases. Each [`Release::release`]
//! decrements it; at zero it is removed from its test, and once a test has no pauses
//! left the scheduler resumes. A timeout or a failure recovery cancels every pause of
//! the test, after which releases are silently ignored.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use super::{Deadline, RunContext};
use crate::errors::ProtocolError;
use crate::model::TestId;

#[derive(Debug, Default)]
struct PauseState {
    cancelled: Cell<bool>,
    remaining: Cell<u32>,
}

/// Shared between a test's pause set and the release handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct Pause(Rc<PauseState>);

impl Pause {
    fn new(calls: u32) -> Self {
        let pause = Pause::default();
        pause.0.remaining.set(calls);
        pause
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.0.remaining.get()
    }

    fn cancel(&self) {
        self.0.cancelled.set(true);
    }

    fn decrement(&self) -> u32 {
        let left = self.remaining().saturating_sub(1);
        self.0.remaining.set(left);
        left
    }
}

/// Outstanding pauses of one test, keyed by an id that counts up from 1.
#[derive(Debug)]
pub(crate) struct PauseSet {
    pauses: BTreeMap<u32, Pause>,
    next_id: u32,
}

impl Default for PauseSet {
    fn default() -> Self {
        Self {
            pauses: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PauseSet {
    fn register(&mut self, calls: u32) -> (u32, Pause) {
        let id = self.next_id;
        self.next_id += 1;
        let pause = Pause::new(calls);
        self.pauses.insert(id, pause.clone());
        (id, pause)
    }

    fn remove(&mut self, id: u32) {
        self.pauses.remove(&id);
    }

    fn cancel_all(&mut self) -> usize {
        let count = self.pauses.len();
        for pause in self.pauses.values() {
            pause.cancel();
        }
        self.pauses.clear();
        count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pauses.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pauses.len()
    }
}

/// Handle returned by [`crate::Assert::pause`]. Clones release the same pause.
#[derive(Clone)]
pub struct Release {
    ctx: Rc<RunContext>,
    test: TestId,
    id: u32,
    pause: Pause,
}

impl Release {
    /// Releases the pause once.
    ///
    /// Errors if no test is running any more, if a different test is running, or if
    /// the pause was already released as many times as it required. Releasing a
    /// cancelled pause (after a timeout) does nothing.
    pub fn release(&self) -> Result<(), ProtocolError> {
        self.ctx.release(self.test, self.id, &self.pause)
    }

    /// Releases that are still required.
    pub fn remaining(&self) -> u32 {
        self.pause.remaining()
    }

    pub fn is_cancelled(&self) -> bool {
        self.pause.is_cancelled()
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("test", &self.test)
            .field("id", &self.id)
            .field("remaining", &self.pause.remaining())
            .field("cancelled", &self.pause.is_cancelled())
            .finish()
    }
}

impl RunContext {
    /// Registers a pause on `test` and re-arms the timeout when one applies. Errors
    /// when `test` is not the running test.
    pub(crate) fn internal_stop(
        self: &Rc<Self>,
        test: TestId,
        calls: u32,
    ) -> Result<Release, ProtocolError> {
        if self.state.borrow().current != Some(test) {
            return Err(ProtocolError::PauseOutsideTest {
                test: self.test_name(test),
            });
        }
        let (id, pause, timeout) = {
            let mut model = self.model.borrow_mut();
            let t = model.test_mut(test);
            let (id, pause) = t.pauses.register(calls.max(1));
            (id, pause, t.timeout.or(self.config.test_timeout))
        };
        {
            let mut state = self.state.borrow_mut();
            state.blocking = true;
            if let Some(millis) = timeout.filter(|ms| *ms > 0) {
                state.deadline = Some(Deadline::after(millis));
            }
        }
        debug!(target: "proctor::pause", test = test.0, pause = id, calls, "pause");
        self.wake.notify_one();
        Ok(Release {
            ctx: Rc::clone(self),
            test,
            id,
            pause,
        })
    }

    fn release(&self, test: TestId, id: u32, pause: &Pause) -> Result<(), ProtocolError> {
        if pause.is_cancelled() {
            return Ok(());
        }
        let current = self.state.borrow().current;
        match current {
            None => {
                return Err(ProtocolError::ReleaseAfterRunFinished {
                    test: self.test_name(test),
                    pause: id,
                })
            }
            Some(running) if running != test => {
                return Err(ProtocolError::ReleaseDuringOtherTest {
                    test: self.test_name(test),
                    pause: id,
                })
            }
            Some(_) => {}
        }
        if pause.remaining() == 0 {
            return Err(ProtocolError::AlreadyReleased {
                test: self.test_name(test),
                pause: id,
            });
        }

        let left = pause.decrement();
        if left == 0 {
            self.model.borrow_mut().test_mut(test).pauses.remove(id);
        }
        debug!(target: "proctor::pause", test = test.0, pause = id, left, "release");
        self.wake.notify_one();
        Ok(())
    }

    /// Cancels every pause of `test` and aborts the futures spawned for it.
    pub(crate) fn cancel_pauses(&self, test: TestId) {
        let cancelled = self.model.borrow_mut().test_mut(test).pauses.cancel_all();
        let spawned = std::mem::take(&mut self.state.borrow_mut().spawned);
        for handle in spawned {
            handle.abort();
        }
        debug!(target: "proctor::pause", test = test.0, cancelled, "cancel pauses");
    }

    /// Unblocks the scheduler after a failure left `test` paused.
    pub(crate) fn recover(&self, test: TestId) {
        self.cancel_pauses(test);
        self.wake.notify_one();
    }

    /// Changes the timeout of `test`, re-arming a running deadline.
    pub(crate) fn reset_timeout(&self, test: TestId, millis: u64) {
        self.model.borrow_mut().test_mut(test).timeout = Some(millis);
        {
            let mut state = self.state.borrow_mut();
            if state.deadline.is_some() {
                state.deadline = (millis > 0).then(|| Deadline::after(millis));
            }
        }
        self.wake.notify_one();
    }

    pub(crate) fn has_pauses(&self, test: TestId) -> bool {
        !self.model.borrow().test(test).pauses.is_empty()
    }
}

impl Deadline {
    pub(crate) fn after(millis: u64) -> Self {
        Self {
            at: tokio::time::Instant::now() + Duration::from_millis(millis),
            millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_ids_count_from_one() {
        let mut set = PauseSet::default();
        let (first, _) = set.register(1);
        let (second, _) = set.register(2);
        assert_eq!((first, second), (1, 2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cancel_all_marks_shared_state() {
        let mut set = PauseSet::default();
        let (_, pause) = set.register(3);
        assert_eq!(set.cancel_all(), 1);
        assert!(set.is_empty());
        assert!(pause.is_cancelled());
        assert_eq!(pause.remaining(), 3);
    }

    #[test]
    fn test_decrement_stops_at_zero() {
        let pause = Pause::new(2);
        assert_eq!(pause.decrement(), 1);
        assert_eq!(pause.decrement(), 0);
        assert_eq!(pause.decrement(), 0);
    }
}
