//! The assertion API handed to every test body and hook.
//!
//! Each comparison records exactly one assertion on the test the [`Assert`] was made
//! for. Failing assertions capture the caller's location as their source.
//!
//! Recording after the test has finished is a protocol error. The convenience
//! methods (`ok`, `equal`, ...) panic with it, the way a failed `assert!` would;
//! [`Assert::push_result`] returns it instead.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, Location};
use std::rc::Rc;

use anyhow::anyhow;
use futures::FutureExt;
use regex::Regex;
use tracing::warn;

use crate::equiv::equivalent;
use crate::errors::{error_string, panic_message, ProtocolError};
use crate::model::{Env, TestId};
use crate::scheduler::{Release, RunContext};
use crate::value::{dump, Value};

mod props;

use props::{object_values, object_values_subset};

/// Input of [`Assert::push_result`].
#[derive(Debug, Clone, Default)]
pub struct AssertionResult {
    pub result: bool,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
    pub message: Option<String>,
    /// The comparison was a negated one (`not_equal`, ...).
    pub negative: bool,
    /// Where the assertion was made; filled in from the caller when `None`.
    pub source: Option<String>,
}

/// What an error must look like for `throws`/`rejects` to pass.
#[derive(Clone)]
pub enum Matcher {
    /// Any error.
    Any,
    /// The rendered error message equals the string.
    Message(String),
    /// The rendered error message matches the regex.
    Pattern(Regex),
    /// The predicate returns true. A panicking predicate fails the assertion.
    Predicate(Rc<dyn Fn(&anyhow::Error) -> bool>),
    /// The error downcasts to a specific type.
    Is {
        name: &'static str,
        check: fn(&anyhow::Error) -> bool,
    },
}

impl Matcher {
    pub fn message(text: impl Into<String>) -> Self {
        Matcher::Message(text.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    pub fn predicate(f: impl Fn(&anyhow::Error) -> bool + 'static) -> Self {
        Matcher::Predicate(Rc::new(f))
    }

    /// Matches errors of type `E`.
    pub fn is<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Matcher::Is {
            name: std::any::type_name::<E>(),
            check: |error| error.downcast_ref::<E>().is_some(),
        }
    }

    fn describe(&self) -> Option<Value> {
        match self {
            Matcher::Any | Matcher::Predicate(_) => None,
            Matcher::Message(text) => Some(Value::from(text.as_str())),
            Matcher::Pattern(regex) => Some(Value::regexp(regex.as_str(), "")),
            Matcher::Is { name, .. } => Some(Value::from(*name)),
        }
    }

    /// Whether `error` satisfies the matcher, and the value to report as expected.
    fn validate(&self, error: &anyhow::Error) -> (bool, Option<Value>) {
        match self {
            Matcher::Any => (true, None),
            Matcher::Message(text) => (error_string(error) == *text, self.describe()),
            Matcher::Pattern(regex) => (regex.is_match(&error_string(error)), self.describe()),
            Matcher::Is { check, .. } => (check(error), self.describe()),
            Matcher::Predicate(f) => {
                match panic::catch_unwind(AssertUnwindSafe(|| f(error))) {
                    Ok(passed) => (passed, None),
                    Err(payload) => (false, Some(Value::from(panic_message(payload.as_ref())))),
                }
            }
        }
    }
}

impl From<Regex> for Matcher {
    fn from(regex: Regex) -> Self {
        Matcher::Pattern(regex)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Any => f.write_str("Any"),
            Matcher::Message(text) => f.debug_tuple("Message").field(text).finish(),
            Matcher::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
            Matcher::Is { name, .. } => f.debug_struct("Is").field("name", name).finish(),
        }
    }
}

/// Assertion handle bound to one test.
#[derive(Clone)]
pub struct Assert {
    test: TestId,
    ctx: Rc<RunContext>,
}

fn message_of(message: &str) -> Option<String> {
    (!message.is_empty()).then(|| message.to_string())
}

#[track_caller]
fn caller_source() -> String {
    let location = Location::caller();
    format!("{}:{}:{}", location.file(), location.line(), location.column())
}

impl Assert {
    pub(crate) fn new(test: TestId, ctx: Rc<RunContext>) -> Self {
        Self { test, ctx }
    }

    pub fn test_id(&self) -> TestId {
        self.test
    }

    pub fn test_name(&self) -> String {
        self.ctx.test_name(self.test)
    }

    /// Records an assertion, or returns the protocol error when its test is not the
    /// one running.
    #[track_caller]
    pub fn push_result(&self, mut result: AssertionResult) -> Result<(), ProtocolError> {
        if result.source.is_none() && !result.result {
            result.source = Some(caller_source());
        }
        self.ctx.push_result(self.test, result)
    }

    #[track_caller]
    fn push(&self, result: AssertionResult) {
        if let Err(err) = self.push_result(result) {
            panic!("{err}");
        }
    }

    #[track_caller]
    fn compare(&self, result: bool, actual: Value, expected: Value, message: &str, negative: bool) {
        self.push(AssertionResult {
            result,
            actual: Some(actual),
            expected: Some(expected),
            message: message_of(message),
            negative,
            source: None,
        });
    }

    // ------------------------------------------------------------------
    // truthiness
    // ------------------------------------------------------------------

    #[track_caller]
    pub fn ok(&self, value: impl Into<Value>, message: &str) {
        let value = value.into();
        let result = value.is_truthy();
        let message = message_of(message).unwrap_or_else(|| {
            if result {
                "okay".to_string()
            } else {
                format!("failed, expected argument to be truthy, was: {}", dump(&value))
            }
        });
        self.push(AssertionResult {
            result,
            actual: Some(value),
            expected: Some(Value::Bool(true)),
            message: Some(message),
            negative: false,
            source: None,
        });
    }

    #[track_caller]
    pub fn not_ok(&self, value: impl Into<Value>, message: &str) {
        let value = value.into();
        let result = !value.is_truthy();
        let message = message_of(message).unwrap_or_else(|| {
            if result {
                "okay".to_string()
            } else {
                format!("failed, expected argument to be falsy, was: {}", dump(&value))
            }
        });
        self.push(AssertionResult {
            result,
            actual: Some(value),
            expected: Some(Value::Bool(false)),
            message: Some(message),
            negative: true,
            source: None,
        });
    }

    #[track_caller]
    pub fn is_true(&self, value: impl Into<Value>, message: &str) {
        let value = value.into();
        let result = matches!(value, Value::Bool(true));
        self.compare(result, value, Value::Bool(true), message, false);
    }

    #[track_caller]
    pub fn is_false(&self, value: impl Into<Value>, message: &str) {
        let value = value.into();
        let result = matches!(value, Value::Bool(false));
        self.compare(result, value, Value::Bool(false), message, false);
    }

    // ------------------------------------------------------------------
    // comparisons
    // ------------------------------------------------------------------

    /// Loose equality.
    #[track_caller]
    pub fn equal(&self, actual: impl Into<Value>, expected: impl Into<Value>, message: &str) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = actual.loose_equals(&expected);
        self.compare(result, actual, expected, message, false);
    }

    #[track_caller]
    pub fn not_equal(&self, actual: impl Into<Value>, expected: impl Into<Value>, message: &str) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = !actual.loose_equals(&expected);
        self.compare(result, actual, expected, message, true);
    }

    #[track_caller]
    pub fn strict_equal(&self, actual: impl Into<Value>, expected: impl Into<Value>, message: &str) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = actual.strict_equals(&expected);
        self.compare(result, actual, expected, message, false);
    }

    #[track_caller]
    pub fn not_strict_equal(
        &self,
        actual: impl Into<Value>,
        expected: impl Into<Value>,
        message: &str,
    ) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = !actual.strict_equals(&expected);
        self.compare(result, actual, expected, message, true);
    }

    #[track_caller]
    pub fn deep_equal(&self, actual: impl Into<Value>, expected: impl Into<Value>, message: &str) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, false);
    }

    #[track_caller]
    pub fn not_deep_equal(
        &self,
        actual: impl Into<Value>,
        expected: impl Into<Value>,
        message: &str,
    ) {
        let (actual, expected) = (actual.into(), expected.into());
        let result = !equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, true);
    }

    /// Deep equality of own properties, ignoring prototypes.
    #[track_caller]
    pub fn prop_equal(&self, actual: impl Into<Value>, expected: impl Into<Value>, message: &str) {
        let actual = object_values(&actual.into(), true);
        let expected = object_values(&expected.into(), true);
        let result = equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, false);
    }

    #[track_caller]
    pub fn not_prop_equal(
        &self,
        actual: impl Into<Value>,
        expected: impl Into<Value>,
        message: &str,
    ) {
        let actual = object_values(&actual.into(), true);
        let expected = object_values(&expected.into(), true);
        let result = !equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, true);
    }

    /// Passes when `actual` has every property of `expected` with an equivalent value.
    #[track_caller]
    pub fn prop_contains(
        &self,
        actual: impl Into<Value>,
        expected: impl Into<Value>,
        message: &str,
    ) {
        let expected = expected.into();
        let actual = object_values_subset(&actual.into(), &expected);
        let expected = object_values(&expected, false);
        let result = equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, false);
    }

    #[track_caller]
    pub fn not_prop_contains(
        &self,
        actual: impl Into<Value>,
        expected: impl Into<Value>,
        message: &str,
    ) {
        let expected = expected.into();
        let actual = object_values_subset(&actual.into(), &expected);
        let expected = object_values(&expected, false);
        let result = !equivalent(&actual, &expected);
        self.compare(result, actual, expected, message, true);
    }

    // ------------------------------------------------------------------
    // errors
    // ------------------------------------------------------------------

    /// Passes when `block` returns an error (or panics) that satisfies `expected`.
    #[track_caller]
    pub fn throws<F, R>(&self, block: F, expected: Matcher, message: &str)
    where
        F: FnOnce() -> anyhow::Result<R>,
    {
        let error = match panic::catch_unwind(AssertUnwindSafe(block)) {
            Ok(Ok(_)) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(anyhow!(panic_message(payload.as_ref()))),
        };
        let result = match error {
            None => AssertionResult {
                result: false,
                expected: expected.describe(),
                message: Some(
                    message_of(message).unwrap_or_else(|| "Expected the block to fail.".to_string()),
                ),
                ..AssertionResult::default()
            },
            Some(error) => {
                let (passed, expected) = expected.validate(&error);
                AssertionResult {
                    result: passed,
                    actual: Some(Value::from(error_string(&error))),
                    expected,
                    message: message_of(message),
                    ..AssertionResult::default()
                }
            }
        };
        self.push(result);
    }

    /// Pauses the test until `future` settles, then passes when it failed with an
    /// error that satisfies `expected`.
    #[track_caller]
    pub fn rejects<Fut, R>(&self, future: Fut, expected: Matcher, message: &str)
    where
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        R: 'static,
    {
        let release = self.pause(1);
        let source = caller_source();
        let message = message_of(message);
        let assert = self.clone();
        let handle = tokio::task::spawn_local(async move {
            let error = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(_)) => None,
                Ok(Err(error)) => Some(error),
                Err(payload) => Some(anyhow!(panic_message(payload.as_ref()))),
            };
            let result = match error {
                None => AssertionResult {
                    result: false,
                    expected: expected.describe(),
                    message: Some(message.unwrap_or_else(|| {
                        format!(
                            "The future passed to assert.rejects in \"{}\" did not reject.",
                            assert.test_name()
                        )
                    })),
                    source: Some(source),
                    ..AssertionResult::default()
                },
                Some(error) => {
                    let (passed, expected) = expected.validate(&error);
                    AssertionResult {
                        result: passed,
                        actual: Some(Value::from(error_string(&error))),
                        expected,
                        message,
                        source: Some(source),
                        ..AssertionResult::default()
                    }
                }
            };
            if let Err(err) = assert.push_result(result) {
                warn!(target: "proctor::assert", error = %err, "rejects settled too late");
            }
            if let Err(err) = release.release() {
                warn!(target: "proctor::assert", error = %err, "rejects settled too late");
            }
        });
        self.ctx.track_spawned(handle);
    }

    /// Runs `future` alongside the test. An error or panic fails the test the way a
    /// failing body does, and unblocks it if it was paused waiting on the work.
    /// The future is aborted when the test finishes.
    pub fn spawn<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let ctx = Rc::clone(&self.ctx);
        let test = self.test;
        let handle = tokio::task::spawn_local(async move {
            let error = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(error)) => error,
                Err(payload) => anyhow!(panic_message(payload.as_ref())),
            };
            ctx.spawned_failed(test, &error);
        });
        self.ctx.track_spawned(handle);
    }

    // ------------------------------------------------------------------
    // steps and bookkeeping
    // ------------------------------------------------------------------

    /// Records a step. An empty message fails.
    #[track_caller]
    pub fn step(&self, message: &str) {
        self.ctx
            .model
            .borrow_mut()
            .test_mut(self.test)
            .steps
            .push(message.to_string());
        let (result, text) = if message.is_empty() {
            (false, "You must provide a message to assert.step")
        } else {
            (true, message)
        };
        self.push(AssertionResult {
            result,
            message: Some(text.to_string()),
            ..AssertionResult::default()
        });
    }

    /// Compares the recorded steps against `steps` and forgets them.
    #[track_caller]
    pub fn verify_steps<I, S>(&self, steps: I, message: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let recorded = std::mem::take(&mut self.ctx.model.borrow_mut().test_mut(self.test).steps);
        let expected: Vec<Value> = steps.into_iter().map(|s| Value::String(s.into())).collect();
        self.deep_equal(Value::array(recorded), Value::array(expected), message);
    }

    /// Declares how many assertions the test will make.
    pub fn expect(&self, count: usize) {
        self.ctx.model.borrow_mut().test_mut(self.test).expected = Some(count);
    }

    pub fn expected(&self) -> Option<usize> {
        self.ctx.model.borrow().test(self.test).expected
    }

    /// Overrides the test's timeout in milliseconds. Zero requires the test to finish
    /// without pausing.
    pub fn timeout(&self, millis: u64) {
        self.ctx.reset_timeout(self.test, millis);
    }

    /// Pauses the test until the returned handle has been released `calls` times.
    ///
    /// # Panics
    ///
    /// When the test is not running; see [`Assert::try_pause`].
    #[track_caller]
    pub fn pause(&self, calls: u32) -> Release {
        match self.try_pause(calls) {
            Ok(release) => release,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`Assert::pause`], returning the protocol error instead of panicking.
    pub fn try_pause(&self, calls: u32) -> Result<Release, ProtocolError> {
        self.ctx.internal_stop(self.test, calls)
    }

    /// The test's scratch environment.
    pub fn env(&self) -> Env {
        self.ctx.model.borrow().test(self.test).env.clone()
    }

    /// Environment shared by every test; watched by the `no_globals` check.
    pub fn globals(&self) -> Env {
        self.ctx.globals.clone()
    }
}

impl fmt::Debug for Assert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assert").field("test", &self.test).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("not found: {0}")]
    struct NotFound(String);

    #[test]
    fn test_matcher_validation() {
        let error = anyhow::Error::new(NotFound("key".into())).context("lookup failed");
        assert!(Matcher::Any.validate(&error).0);
        assert!(Matcher::message("lookup failed: not found: key").validate(&error).0);
        assert!(Matcher::pattern("not found").unwrap().validate(&error).0);
        assert!(!Matcher::pattern("^not").unwrap().validate(&error).0);
        assert!(Matcher::is::<NotFound>().validate(&error).0);
        assert!(!Matcher::is::<std::io::Error>().validate(&error).0);
        assert!(Matcher::predicate(|e| e.to_string() == "lookup failed").validate(&error).0);
    }

    #[test]
    fn test_panicking_predicate_fails() {
        let error = anyhow!("x");
        let (passed, expected) = Matcher::predicate(|_| panic!("bad predicate")).validate(&error);
        assert!(!passed);
        assert_eq!(expected.and_then(|v| v.as_str().map(str::to_string)).as_deref(), Some("bad predicate"));
    }

    #[test]
    fn test_message_of_treats_empty_as_none() {
        assert_eq!(message_of(""), None);
        assert_eq!(message_of("m").as_deref(), Some("m"));
    }
}
