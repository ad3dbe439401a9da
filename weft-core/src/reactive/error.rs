//! Error types for the reactive engine.
//!
//! Failures inside user closures are panics. The engine captures them with
//! `catch_unwind` so a failing memo can cache its error and a draining batch
//! can finish the remaining effects before re-raising the first failure.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

/// Misuse errors reported by fallible registration APIs.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// `cleanup` was called while no effect body was on the stack.
    #[error("cleanup registered outside of a running effect")]
    CleanupOutsideEffect,
}

/// A captured panic from a compute function.
///
/// Memos cache the error so every read can re-raise it until the next
/// successful recomputation. The payload itself is not clonable, so the
/// capture keeps a shareable message; re-raising uses the `CaughtPanic`
/// itself as the new payload, and a capture of that payload unwraps back to
/// the original message rather than nesting.
#[derive(Clone)]
pub struct CaughtPanic {
    message: Arc<str>,
}

impl CaughtPanic {
    /// Convert a raw `catch_unwind` payload into a shareable capture.
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(caught) = payload.downcast_ref::<CaughtPanic>() {
            return caught.clone();
        }
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("reactive compute function panicked")
        };
        Self { message }
    }

    /// The panic message, as far as it could be preserved.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-raise the captured panic.
    pub(crate) fn raise(&self) -> ! {
        panic::panic_any(self.clone())
    }
}

impl fmt::Debug for CaughtPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaughtPanic")
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for CaughtPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Run a closure, converting a panic into a [`CaughtPanic`].
pub(crate) fn run_caught<R>(f: impl FnOnce() -> R) -> Result<R, CaughtPanic> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| CaughtPanic::from_payload(&*payload))
}
