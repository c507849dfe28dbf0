//! Proctor error types.
//!
//! Two families of errors exist. [`ProtocolError`]s are misuses of the engine by test
//! code (an assertion after its test finished, a pause released twice). They are
//! returned synchronously to the caller and are never folded into a test's results,
//! because they cannot be attributed to whichever test is running. [`EngineError`]s
//! are failures of the engine itself: starting a run twice, building the runtime,
//! loading configuration.
//!
//! Everything else that goes wrong inside a test (failed assertions, errors returned by
//! a body or hook, panics, timeouts) is recorded as a failing assertion on that test.

use miette::Diagnostic;
use thiserror::Error;

// ============================================================================
// PROTOCOL ERRORS - test code misusing the engine
// ============================================================================

/// Misuse of the assertion or pause protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ProtocolError {
    #[error("Assertion occurred after test finished.\n> Test: {test}\n> Message: {message}\n")]
    #[diagnostic(
        code(proctor::assert::outside_test),
        help("make sure asynchronous work finishes before the test does, e.g. with `assert.pause()`")
    )]
    AssertionOutsideTest { test: String, message: String },

    #[error("Unexpected release of async pause after tests finished.\n> Test: {test} [async #{pause}]")]
    #[diagnostic(code(proctor::pause::after_run))]
    ReleaseAfterRunFinished { test: String, pause: u32 },

    #[error("Unexpected release of async pause during a different test.\n> Test: {test} [async #{pause}]")]
    #[diagnostic(code(proctor::pause::other_test))]
    ReleaseDuringOtherTest { test: String, pause: u32 },

    #[error("Tried to release async pause that was already released.\n> Test: {test} [async #{pause}]")]
    #[diagnostic(
        code(proctor::pause::already_released),
        help("a pause created with `pause(n)` must be released exactly n times")
    )]
    AlreadyReleased { test: String, pause: u32 },

    #[error("Tried to pause a test that is not running.\n> Test: {test}\n")]
    #[diagnostic(
        code(proctor::pause::outside_test),
        help("only pause from the test's own body, hooks or the work they start")
    )]
    PauseOutsideTest { test: String },
}

impl ProtocolError {
    /// Name of the test the misuse is attributed to.
    pub fn test_name(&self) -> &str {
        match self {
            ProtocolError::AssertionOutsideTest { test, .. } => test,
            ProtocolError::ReleaseAfterRunFinished { test, .. } => test,
            ProtocolError::ReleaseDuringOtherTest { test, .. } => test,
            ProtocolError::AlreadyReleased { test, .. } => test,
            ProtocolError::PauseOutsideTest { test } => test,
        }
    }
}

// ============================================================================
// ENGINE ERRORS - failures of the run itself
// ============================================================================

/// Failure to start or configure a run.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("the run has already been started")]
    #[diagnostic(code(proctor::run::already_running))]
    AlreadyRunning,

    #[error("failed to build the async runtime: {0}")]
    #[diagnostic(code(proctor::run::runtime))]
    Runtime(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(proctor::config::invalid))]
    Config(#[from] serde_yaml::Error),
}

// ============================================================================
// ERROR RENDERING HELPERS
// ============================================================================

/// Renders a callback error the way it is recorded in a failing assertion message.
pub(crate) fn error_string(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

/// Captured backtrace of a callback error, when one was recorded.
pub(crate) fn error_stack(error: &anyhow::Error) -> Option<String> {
    let backtrace = error.backtrace();
    match backtrace.status() {
        std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
