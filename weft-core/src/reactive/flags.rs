//! Node State Flags
//!
//! Every listener (memo or effect) carries a packed word describing where it
//! is in the refresh lifecycle. Plain signals have no flags; the accessor on
//! the node trait reports an empty word for them.
//!
//! # Staleness States
//!
//! - `DIRTY`: a direct source definitely changed; the next refresh must
//!   recompute.
//! - `MAYBE_DIRTY`: something upstream *may* have changed; the next refresh
//!   walks the dependency list and compares epochs before deciding.
//! - neither: clean, provided the node is subscribed (`TRACKING`).

use bitflags::bitflags;

bitflags! {
    /// Lifecycle state for a reactive node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// The node's body is currently on the stack (re-entrancy guard).
        const RUNNING = 1 << 0;

        /// A direct source changed; recomputation is required.
        const DIRTY = 1 << 1;

        /// An upstream source may have changed; verify by epoch before
        /// recomputing.
        const MAYBE_DIRTY = 1 << 2;

        /// The node holds live subscriptions on every entry of its
        /// dependency list.
        const TRACKING = 1 << 3;

        /// The node already propagated (or enqueued) a notification this
        /// wave.
        const NOTIFIED = 1 << 4;

        /// The cached value is a captured error; reads re-raise it.
        const HAS_ERROR = 1 << 5;

        /// The effect was disposed and must never run again.
        const DISPOSED = 1 << 6;
    }
}

impl Flags {
    /// The staleness bits cleared at the start of every refresh.
    pub const STATUS: Flags = Flags::DIRTY.union(Flags::MAYBE_DIRTY);
}
