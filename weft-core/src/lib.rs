//! Weft Core
//!
//! This crate implements a fine-grained reactive computation graph:
//!
//! - Signals: mutable cells that know their subscribers
//! - Memos: cached derivations with lazy, epoch-compared refresh
//! - Effects: eager side effects coalesced by a batching scheduler
//!
//! The engine is single-threaded by design; all scheduling state lives in
//! thread-locals, so independent graphs on different threads never
//! interact.
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{signal, memo, effect, batch};
//!
//! let count = signal(0);
//!
//! let count_in = count.clone();
//! let doubled = memo(move || count_in.get() * 2);
//!
//! let doubled_in = doubled.clone();
//! let logger = effect(move || {
//!     println!("doubled is {}", doubled_in.get());
//! });
//!
//! count.set(5); // logger runs once, printing "doubled is 10"
//!
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! }); // one more run, printing "doubled is 14"
//!
//! logger.dispose();
//! ```

pub mod reactive;

pub use reactive::{
    batch, cleanup, effect, effect_seeded, effect_with_prev, is_tracking, memo, memo_seeded,
    signal, try_cleanup, untrack, CaughtPanic, Effect, Memo, NodeId, ReactiveError, Signal,
};
pub use reactive::{max_batch_iterations, set_max_batch_iterations, DEFAULT_MAX_BATCH_ITERATIONS};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// The listener predicate, as consumed by a lazy property proxy.
#[cfg(feature = "python")]
#[pyfunction(name = "is_tracking")]
fn py_is_tracking() -> bool {
    reactive::is_tracking()
}

/// Run a Python callable under a batch scope and return its result.
#[cfg(feature = "python")]
#[pyfunction(name = "batch")]
fn py_batch(py: Python<'_>, callback: PyObject) -> PyResult<PyObject> {
    reactive::batch(|| callback.call0(py))
}

/// Python module definition.
///
/// Exposes exactly the surface the property proxy consumes: `Signal`,
/// `batch`, and `is_tracking`.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<reactive::PySignal>()?;
    m.add_function(wrap_pyfunction!(py_is_tracking, m)?)?;
    m.add_function(wrap_pyfunction!(py_batch, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
