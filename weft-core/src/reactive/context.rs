//! Dependency-capture context.
//!
//! A single thread-local slot holds the listener currently on the stack.
//! While a listener runs, every tracked read routes through
//! [`record_dependency`], which diffs this run's read sequence against the
//! previous one:
//!
//! 1. While reads repeat the previous sequence, a cursor advances over the
//!    old list and nothing is allocated.
//!
//! 2. The first divergence freezes the cursor and opens an append buffer;
//!    the old list is now split into a kept prefix and a doomed suffix.
//!
//! 3. At run end, [`TrackingScope::reconcile`] unsubscribes the suffix,
//!    subscribes the buffer, and installs `prefix ++ buffer` as the new
//!    dependency list.
//!
//! Re-reads of the same source within one run are de-duplicated by stamping
//! the source with the run's read-clock epoch.

use std::cell::RefCell;
use std::sync::{Arc, RwLock};

use super::flags::Flags;
use super::subscriber::{DepList, ReactiveNode};

thread_local! {
    static CURRENT: RefCell<Option<TrackingScope>> = const { RefCell::new(None) };
}

/// Capture state for one listener run.
pub(crate) struct TrackingScope {
    listener: Arc<dyn ReactiveNode>,
    context_epoch: i64,
    prev_deps: DepList,
    cursor: usize,
    fresh: Option<DepList>,
}

impl TrackingScope {
    pub(crate) fn new(
        listener: Arc<dyn ReactiveNode>,
        context_epoch: i64,
        prev_deps: DepList,
    ) -> Self {
        Self {
            listener,
            context_epoch,
            prev_deps,
            cursor: 0,
            fresh: None,
        }
    }

    /// Apply the end-of-run diff to the listener's dependency list.
    ///
    /// The discarded suffix is unsubscribed *before* the buffer is
    /// subscribed so a source that moved from suffix to buffer ends with
    /// exactly one dependant entry.
    pub(crate) fn reconcile(mut self, deps_slot: &RwLock<DepList>) {
        let listener_id = self.listener.id();
        let tracking = self.listener.flags().contains(Flags::TRACKING);

        match self.fresh.take() {
            Some(buffer) => {
                if tracking {
                    for old in &self.prev_deps[self.cursor..] {
                        old.unsubscribe(listener_id);
                    }
                    for new in &buffer {
                        new.subscribe(&self.listener);
                    }
                }
                let mut next = self.prev_deps;
                next.truncate(self.cursor);
                next.extend(buffer);
                *deps_slot.write().expect("deps lock poisoned") = next;
            }
            None if self.cursor < self.prev_deps.len() => {
                if tracking {
                    for old in &self.prev_deps[self.cursor..] {
                        old.unsubscribe(listener_id);
                    }
                }
                let mut next = self.prev_deps;
                next.truncate(self.cursor);
                *deps_slot.write().expect("deps lock poisoned") = next;
            }
            // The run repeated the previous sequence exactly.
            None => {
                *deps_slot.write().expect("deps lock poisoned") = self.prev_deps;
            }
        }
    }
}

/// Install `scope` as the current listener, returning the outer one.
pub(crate) fn push_scope(scope: TrackingScope) -> Option<TrackingScope> {
    CURRENT.with(|current| current.borrow_mut().replace(scope))
}

/// Reinstall the saved outer listener and hand back the finished scope.
pub(crate) fn pop_scope(outer: Option<TrackingScope>) -> TrackingScope {
    CURRENT.with(|current| {
        let mut slot = current.borrow_mut();
        let finished = slot.take().expect("tracking scope missing at end of run");
        *slot = outer;
        finished
    })
}

/// Record a read of `node` against the current listener, if any.
pub(crate) fn record_dependency<N>(node: &N)
where
    N: ReactiveNode + Clone + 'static,
{
    CURRENT.with(|current| {
        let mut slot = current.borrow_mut();
        let Some(scope) = slot.as_mut() else {
            return;
        };

        // Already recorded during this run.
        if node.access_epoch() == scope.context_epoch {
            return;
        }
        node.mark_accessed(scope.context_epoch);

        match &mut scope.fresh {
            None => {
                let repeats_previous =
                    scope.prev_deps.get(scope.cursor).map(|dep| dep.id()) == Some(node.id());
                if repeats_previous {
                    scope.cursor += 1;
                } else {
                    let mut buffer = DepList::new();
                    buffer.push(Arc::new(node.clone()));
                    scope.fresh = Some(buffer);
                }
            }
            Some(buffer) => buffer.push(Arc::new(node.clone())),
        }
    });
}

/// Run `f` on the current listener's handle, if one is installed.
pub(crate) fn with_current_listener<R>(f: impl FnOnce(&Arc<dyn ReactiveNode>) -> R) -> Option<R> {
    CURRENT.with(|current| current.borrow().as_ref().map(|scope| f(&scope.listener)))
}

/// Is a listener currently capturing dependencies on this thread?
///
/// This is the predicate a lazy property-proxy client consults before
/// allocating a backing signal for an accessed field.
pub fn is_tracking() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Execute `f` with the current listener temporarily cleared.
///
/// Reads inside `f` record no dependencies; the listener is restored even
/// if `f` panics.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let saved = CURRENT.with(|current| current.borrow_mut().take());
    let _restore = RestoreOnDrop { saved: Some(saved) };
    f()
}

struct RestoreOnDrop {
    saved: Option<Option<TrackingScope>>,
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            CURRENT.with(|current| *current.borrow_mut() = saved);
        }
    }
}
