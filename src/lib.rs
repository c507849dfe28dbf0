//! Proctor: a test-execution engine.
//!
//! Tests are registered into nested groups with hooks, queued (optionally filtered,
//! focused, reordered or shuffled), and executed one at a time by a cooperative
//! scheduler that supports async pauses and timeouts. Results are recorded as
//! assertions and published as events to listeners.
//!
//! Alongside the engine the crate exposes the two algorithms assertions rely on:
//! deep equivalence of cyclic value graphs ([`equiv`]) and a Myers text diff
//! ([`diff`]).

// ============================================================================
// VALUES AND ALGORITHMS
// ============================================================================

pub mod diff;
pub mod equiv;
pub mod hash;
pub mod value;

// ============================================================================
// ENGINE
// ============================================================================

pub mod assert;
pub mod config;
pub mod errors;
pub mod events;
mod filter;
pub mod model;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod suite;

pub use assert::{Assert, AssertionResult, Matcher};
pub use config::RunConfig;
pub use equiv::{equiv, equivalent};
pub use errors::{EngineError, ProtocolError};
pub use events::{Event, EventKind, Listener};
pub use model::{Callback, Env, GroupId, HookKind, Modifiers, Outcome, TestId};
pub use report::{RunReport, Status, TestCounts};
pub use scheduler::Release;
pub use store::{FailureStore, MemoryStore};
pub use suite::Suite;
pub use value::Value;
