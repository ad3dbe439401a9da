//! Node identity and the shared node interface.
//!
//! All three node kinds (signal, memo, effect) implement one trait. Where an
//! operation does not apply to a kind (a signal is never notified, an
//! effect is never subscribed to), the default implementation is a no-op
//! rather than splitting the hierarchy further.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use super::flags::Flags;

/// Unique identifier for a reactive node.
///
/// Each node gets a unique ID when created, drawn from one shared counter so
/// identities never collide across node kinds. The ID is what a dependant
/// list stores alongside the handle, making unsubscription a linear scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered dependency list of a listener, in read order.
pub(crate) type DepList = SmallVec<[Arc<dyn ReactiveNode>; 4]>;

/// Subscribers of a source, keyed by listener ID for removal.
pub(crate) type DependantList = SmallVec<[(NodeId, Arc<dyn ReactiveNode>); 2]>;

/// The operations shared by signals, memos, and effects.
///
/// Sources (signals, memos) implement the subscription half; listeners
/// (memos, effects) implement the notification half. Memos implement both.
pub(crate) trait ReactiveNode: Send + Sync {
    /// The node's unique identity.
    fn id(&self) -> NodeId;

    /// Epoch of the node's last observed change (`-1` if never).
    fn write_epoch(&self) -> i64;

    /// Current lifecycle flags. Signals report an empty word.
    fn flags(&self) -> Flags {
        Flags::empty()
    }

    /// OR the given bits into the flag word.
    fn set_flags(&self, _set: Flags) {}

    /// Clear the given bits from the flag word.
    fn clear_flags(&self, _clear: Flags) {}

    /// De-dup stamp for the current listener's read pass.
    fn access_epoch(&self) -> i64 {
        -1
    }

    /// Stamp the node as read under the given run epoch.
    fn mark_accessed(&self, _epoch: i64) {}

    /// Pull-refresh; `true` iff the cached value changed. Plain signals are
    /// never stale.
    fn refresh(&self) -> bool {
        false
    }

    /// Add a listener to the dependant list.
    fn subscribe(&self, _listener: &Arc<dyn ReactiveNode>) {}

    /// Remove a listener from the dependant list.
    fn unsubscribe(&self, _listener: NodeId) {}

    /// Staleness notification from an upstream source.
    fn notify(&self, _flag: Flags) {}

    /// Snapshot of the node's dependency list (empty for signals).
    fn dependencies(&self) -> DepList {
        DepList::new()
    }

    /// Re-run the node's body (effects only; judged stale by the scheduler).
    fn run(&self) {}

    /// Register a cleanup callback for the node's next teardown.
    ///
    /// Returns `false` for node kinds that do not own cleanups.
    fn register_cleanup(&self, _cb: Box<dyn FnOnce() + Send>) -> bool {
        false
    }
}

/// Decide whether a listener must recompute.
///
/// `DIRTY` is an unconditional yes. `MAYBE_DIRTY` walks the dependency list
/// in read order and answers yes at the first dep whose epoch advanced past
/// the listener's, or whose own refresh produced a changed value. A chain of
/// `MAYBE_DIRTY` propagations discharges here without recomputing anything
/// as long as upstream epochs have not moved.
pub(crate) fn is_stale(flags: Flags, write_epoch: i64, deps: &[Arc<dyn ReactiveNode>]) -> bool {
    if flags.contains(Flags::DIRTY) {
        return true;
    }

    if flags.contains(Flags::MAYBE_DIRTY) {
        for dep in deps {
            if dep.write_epoch() > write_epoch {
                return true;
            }
            if dep.refresh() {
                return true;
            }
        }
    }

    false
}
