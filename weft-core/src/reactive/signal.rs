//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a listener (memo/effect), the read is
//!    recorded against that listener's dependency list.
//!
//! 2. When a signal's value changes, the write clock ticks, the signal is
//!    stamped with the new epoch, and every dependant is notified `DIRTY`
//!    under a batch scope.
//!
//! 3. The outermost batch drains the notified effects.
//!
//! # Change Detection
//!
//! `set` is a no-op when the new value compares equal to the stored one.
//! Equality is whatever `PartialEq` means for `T`; value types compare by
//! value, handle types should compare by identity. A client mutating an
//! object in place must store a fresh reference for the change to be
//! observed.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use super::context;
use super::flags::Flags;
use super::runtime::{self, BatchScope};
use super::subscriber::{DependantList, NodeId, ReactiveNode};

/// A reactive signal holding a value of type T.
///
/// Cloning a `Signal` produces a handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value (tracked when inside a listener)
/// let value = count.get();
///
/// // Update the value (notifies dependants)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: NodeId,

    /// The current value.
    value: Arc<RwLock<T>>,

    /// Epoch of the last value-changing write (`-1` if never written).
    write_epoch: Arc<AtomicI64>,

    /// De-dup stamp for the current listener's read pass.
    access_epoch: Arc<AtomicI64>,

    /// Listeners subscribed to this signal.
    dependants: Arc<RwLock<DependantList>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: NodeId::new(),
            value: Arc::new(RwLock::new(value)),
            write_epoch: Arc::new(AtomicI64::new(-1)),
            access_epoch: Arc::new(AtomicI64::new(-1)),
            dependants: Arc::new(RwLock::new(DependantList::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called while a listener is capturing, this records the listener's
    /// dependency on this signal.
    pub fn get(&self) -> T {
        context::record_dependency(self);
        self.value.read().expect("value lock poisoned").clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.read().expect("value lock poisoned").clone()
    }

    /// Set a new value and notify dependants.
    ///
    /// A write that compares equal to the stored value is a no-op: the
    /// write clock does not tick and nothing is notified.
    pub fn set(&self, next: T)
    where
        T: PartialEq,
    {
        {
            let current = self.value.read().expect("value lock poisoned");
            if *current == next {
                return;
            }
        }

        *self.value.write().expect("value lock poisoned") = next;
        self.write_epoch
            .store(runtime::next_write_epoch(), Ordering::SeqCst);

        // Cycle breaker: past the wave ceiling the value still lands but
        // nothing is notified for the rest of the drain.
        if runtime::notifications_suppressed() {
            return;
        }

        let _batch = BatchScope::enter();
        let subscribers = self
            .dependants
            .read()
            .expect("dependants lock poisoned")
            .clone();
        for (_, listener) in subscribers.iter() {
            listener.notify(Flags::DIRTY);
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        T: PartialEq,
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.value.read().expect("value lock poisoned");
            f(&guard)
        };
        self.set(next);
    }

    /// Get the number of subscribed listeners.
    pub fn subscriber_count(&self) -> usize {
        self.dependants
            .read()
            .expect("dependants lock poisoned")
            .len()
    }
}

impl<T> ReactiveNode for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn write_epoch(&self) -> i64 {
        self.write_epoch.load(Ordering::SeqCst)
    }

    fn access_epoch(&self) -> i64 {
        self.access_epoch.load(Ordering::SeqCst)
    }

    fn mark_accessed(&self, epoch: i64) {
        self.access_epoch.store(epoch, Ordering::SeqCst);
    }

    fn subscribe(&self, listener: &Arc<dyn ReactiveNode>) {
        self.dependants
            .write()
            .expect("dependants lock poisoned")
            .push((listener.id(), Arc::clone(listener)));
    }

    fn unsubscribe(&self, listener: NodeId) {
        self.dependants
            .write()
            .expect("dependants lock poisoned")
            .retain(|(id, _)| *id != listener);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            write_epoch: Arc::clone(&self.write_epoch),
            access_epoch: Arc::clone(&self.access_epoch),
            dependants: Arc::clone(&self.dependants),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Python Bindings
// ----------------------------------------------------------------------------

/// The surface a lazy property proxy consumes: `Signal` over Python object
/// references with identity equality, plus `batch` and the listener
/// predicate exposed at the module level (see `lib.rs`).
#[cfg(feature = "python")]
mod py {
    use pyo3::prelude::*;

    use super::Signal;

    /// Value cell contents for Python-held signals.
    ///
    /// Equality is reference identity, so storing a mutated-in-place object
    /// is a no-op write; only a new object reference is observed.
    #[derive(Debug)]
    pub struct PyValue(pub Py<PyAny>);

    impl Clone for PyValue {
        fn clone(&self) -> Self {
            Python::with_gil(|py| PyValue(self.0.clone_ref(py)))
        }
    }

    impl PartialEq for PyValue {
        fn eq(&self, other: &Self) -> bool {
            self.0.as_ptr() == other.0.as_ptr()
        }
    }

    /// Python-exposed Signal type.
    #[pyclass(name = "Signal")]
    pub struct PySignal {
        inner: Signal<PyValue>,
    }

    #[pymethods]
    impl PySignal {
        /// Create a new signal with the given initial value.
        #[new]
        fn new(value: PyObject) -> Self {
            Self {
                inner: Signal::new(PyValue(value)),
            }
        }

        /// Get the current value (tracked when read inside a listener).
        #[getter]
        fn value(&self) -> PyObject {
            self.inner.get().0
        }

        /// Set a new value. Identity-equal writes are no-ops.
        #[setter]
        fn set_value(&self, value: PyObject) {
            self.inner.set(PyValue(value));
        }

        /// Get the current value without recording a dependency.
        fn peek(&self) -> PyObject {
            self.inner.get_untracked().0
        }

        /// Get the number of subscribed listeners.
        fn subscriber_count(&self) -> usize {
            self.inner.subscriber_count()
        }

        fn __repr__(&self, py: Python<'_>) -> String {
            let value = self.inner.get_untracked();
            let repr = value
                .0
                .bind(py)
                .repr()
                .map(|r| r.to_string())
                .unwrap_or_else(|_| "?".to_string());
            format!(
                "Signal(value={}, subscribers={})",
                repr,
                self.inner.subscriber_count()
            )
        }
    }
}

#[cfg(feature = "python")]
pub use py::{PySignal, PyValue};

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
