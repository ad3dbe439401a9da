//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and
//! effects, tied together by two epoch clocks and a batching scheduler.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal is read within
//! a tracking context (a memo or effect), the read is recorded as a
//! dependency. When the signal's value changes, dependants are notified:
//! direct subscribers as definitely stale, transitive ones as possibly
//! stale.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when a dependency actually changed, which it decides by comparing
//! write-clock epochs rather than eagerly recomputing. Unread memos cost
//! nothing.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Re-runs are coalesced per batch: many writes, one
//! run.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: a thread-local slot identifies the
//! listener currently running, and every tracked read diffs itself against
//! the listener's previous dependency list. This approach (sometimes
//! called "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod effect;
mod error;
mod flags;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use context::{is_tracking, untrack};
pub use effect::{cleanup, try_cleanup, Effect};
pub use error::{CaughtPanic, ReactiveError};
pub use flags::Flags;
pub use memo::Memo;
pub use runtime::{
    batch, max_batch_iterations, set_max_batch_iterations, DEFAULT_MAX_BATCH_ITERATIONS,
};
pub use signal::Signal;
pub use subscriber::NodeId;

#[cfg(feature = "python")]
pub use signal::{PySignal, PyValue};

/// Create a signal holding `value`.
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    Signal::new(value)
}

/// Create a lazy memo over `compute`.
pub fn memo<T, F>(compute: F) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(compute)
}

/// Create a lazy memo whose compute receives the previous value, seeded
/// with `init` for the first run.
pub fn memo_seeded<T, F>(init: T, compute: F) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(&T) -> T + Send + Sync + 'static,
{
    Memo::seeded(init, compute)
}

/// Create an effect and run it immediately.
pub fn effect<F>(run: F) -> Effect<()>
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(run)
}

/// Create an effect whose body receives its previous return value.
pub fn effect_with_prev<T, F>(run: F) -> Effect<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Option<&T>) -> T + Send + Sync + 'static,
{
    Effect::with_prev(run)
}

/// Create an effect whose body receives its previous return value, seeded
/// with `init` for the first run.
pub fn effect_seeded<T, F>(init: T, run: F) -> Effect<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> T + Send + Sync + 'static,
{
    Effect::seeded(init, run)
}
