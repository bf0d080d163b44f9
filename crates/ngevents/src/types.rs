//! # Core Types
//!
//! Scheduling priorities ("nice" values), listener context status and the
//! reserved event names that carry special semantics on every emitter.

use serde::{Deserialize, Serialize};

/// Scheduling priority of an emission, a listener or a context.
///
/// More negative means more eager. The effective nice value of a listener
/// invocation is the *least eager* of the emission's, the listener's and its
/// context's values.
///
/// * [`SYNC`] - invoked inline, before `emit()` returns
/// * negative finite values - invoked inline while the emitter's recursion
///   depth is below the magnitude of the value, deferred to the scheduler's
///   next immediate slot once the depth reaches it
/// * `0` and above - deferred by that many milliseconds
pub type Nice = i64;

/// Invoke inline, on the caller's stack.
pub const SYNC: Nice = i64::MIN;

/// Deferred to the next immediate slot as soon as any dispatch is running.
pub const IMMEDIATE: Nice = -1;

/// Deferred through the timer with a zero delay.
pub const TIMEOUT: Nice = 0;

/// Emitted (with the error value) to report an error; throws when unhandled.
pub const ERROR: &str = "error";

/// Emitted with the listener descriptors of every newly added listener.
pub const NEW_LISTENER: &str = "newListener";

/// Emitted with the listener descriptors of removed listeners.
pub const REMOVE_LISTENER: &str = "removeListener";

/// Emitted on interruptible emitters when a listener interrupts an event.
pub const INTERRUPT: &str = "interrupt";

/// Status of a named listener context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    /// Listeners receive events normally.
    #[default]
    Enabled,
    /// Listeners are skipped; events are dropped for them, not retried later.
    Disabled,
    /// Listener invocations are queued until the context is enabled again.
    Queued,
}

/// Renders a nice value the way logs and descriptors show it.
pub fn describe_nice(nice: Nice) -> String {
    match nice {
        SYNC => "SYNC".to_string(),
        n if n < 0 => format!("recursion<{}", n.saturating_neg()),
        n => format!("{n}ms"),
    }
}
