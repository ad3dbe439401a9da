//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. A source change marks the memo `DIRTY` (direct) or `MAYBE_DIRTY`
//!    (transitive); the memo itself recomputes nothing at that point.
//!
//! 3. On the next access, the memo first tries to prove itself clean: if
//!    the write clock has not moved since its last refresh, or it is
//!    subscribed and carries no staleness flags, the cached value stands.
//!
//! 4. Failing that, it walks its dependency list comparing epochs. Only
//!    when a source actually advanced does the computation re-run.
//!
//! # Why This Matters
//!
//! A `MAYBE_DIRTY` chain can be discharged by epoch comparison alone, so a
//! signal write that does not actually alter a memo's inputs costs a walk,
//! not a recomputation. Memos that are never read stay stale for free.
//!
//! # Subscriptions
//!
//! A memo holds live subscriptions on its sources only while it has
//! dependants of its own. When the last dependant leaves, the memo
//! unsubscribes everywhere; its dependency list is remembered so the next
//! subscriber can re-establish the edges.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use super::context::{self, TrackingScope};
use super::error::{run_caught, CaughtPanic};
use super::flags::Flags;
use super::runtime;
use super::subscriber::{is_stale, DepList, DependantList, NodeId, ReactiveNode};

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound detects whether a recomputation actually produced
/// a different value; unchanged results do not wake dependants.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Unique identifier for this memo.
    id: NodeId,

    /// The computation, given the previous value when one exists.
    compute: Arc<dyn Fn(Option<&T>) -> T + Send + Sync>,

    /// The cached value (`None` until first computed, unless seeded).
    value: Arc<RwLock<Option<T>>>,

    /// A captured computation panic; reads re-raise it until the next
    /// successful recomputation.
    error: Arc<RwLock<Option<CaughtPanic>>>,

    /// Lifecycle flags.
    flags: Arc<RwLock<Flags>>,

    /// Epoch of the last value change (`-1` if never computed).
    write_epoch: Arc<AtomicI64>,

    /// De-dup stamp for the current listener's read pass.
    access_epoch: Arc<AtomicI64>,

    /// Write-clock value observed at the last refresh.
    realm_epoch: Arc<AtomicI64>,

    /// Sources read during the last run, in read order.
    deps: Arc<RwLock<DepList>>,

    /// Listeners subscribed to this memo.
    dependants: Arc<RwLock<DependantList>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation.
    ///
    /// The computation is not run immediately; it runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_prev(move |_| compute())
    }

    /// Create a memo whose computation receives the previous value.
    pub fn with_prev<F>(compute: F) -> Self
    where
        F: Fn(Option<&T>) -> T + Send + Sync + 'static,
    {
        Self {
            id: NodeId::new(),
            compute: Arc::new(compute),
            value: Arc::new(RwLock::new(None)),
            error: Arc::new(RwLock::new(None)),
            flags: Arc::new(RwLock::new(Flags::empty())),
            write_epoch: Arc::new(AtomicI64::new(-1)),
            access_epoch: Arc::new(AtomicI64::new(-1)),
            realm_epoch: Arc::new(AtomicI64::new(-1)),
            deps: Arc::new(RwLock::new(DepList::new())),
            dependants: Arc::new(RwLock::new(DependantList::new())),
        }
    }

    /// Create a memo seeded with an initial previous value.
    ///
    /// The seed is only ever observed as `prev` on the first run; it is not
    /// a cached result and the first read still computes.
    pub fn seeded<F>(init: T, compute: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        let memo = Self::with_prev(move |prev| {
            compute(prev.expect("seeded memo always has a previous value"))
        });
        *memo.value.write().expect("value lock poisoned") = Some(init);
        memo
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Records a dependency for the current listener. If the last
    /// computation panicked, the captured panic is re-raised.
    pub fn get(&self) -> T {
        self.refresh_value();
        context::record_dependency(self);
        self.read_or_raise()
    }

    /// Get the current value without recording a dependency.
    ///
    /// Still refreshes first; a memo read is never stale.
    pub fn get_untracked(&self) -> T {
        self.refresh_value();
        self.read_or_raise()
    }

    fn read_or_raise(&self) -> T {
        if let Some(caught) = self.error.read().expect("error lock poisoned").clone() {
            caught.raise();
        }
        self.value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("memo read before its first computation completed")
    }

    /// Pull-refresh. Returns `true` iff the cached value changed.
    fn refresh_value(&self) -> bool {
        let before;
        {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            flags.remove(Flags::NOTIFIED);

            // Nothing anywhere has been written since the last refresh.
            if self.realm_epoch.load(Ordering::SeqCst) == runtime::write_clock() {
                return false;
            }
            // Subscribed and carrying no staleness hint: definitely clean.
            if flags.contains(Flags::TRACKING) && !flags.intersects(Flags::STATUS) {
                return false;
            }
            // Self-reference from our own computation.
            if flags.contains(Flags::RUNNING) {
                return false;
            }

            before = *flags;
            flags.remove(Flags::STATUS);
            flags.insert(Flags::RUNNING);
        }
        self.realm_epoch
            .store(runtime::write_clock(), Ordering::SeqCst);

        // An already-computed memo may prove itself clean by the epoch
        // walk. An unsubscribed memo receives no notifications, so its
        // flag word cannot be trusted and the walk is forced.
        if self.write_epoch.load(Ordering::SeqCst) > -1 {
            let stale_flags = if before.contains(Flags::TRACKING) {
                before
            } else {
                before | Flags::MAYBE_DIRTY
            };
            let deps = self.deps.read().expect("deps lock poisoned").clone();
            if !is_stale(stale_flags, self.write_epoch.load(Ordering::SeqCst), &deps) {
                self.flags
                    .write()
                    .expect("flags lock poisoned")
                    .remove(Flags::RUNNING);
                return false;
            }
        }

        let scope = TrackingScope::new(
            Arc::new(self.clone()),
            runtime::next_read_epoch(),
            self.deps.read().expect("deps lock poisoned").clone(),
        );
        let outer = context::push_scope(scope);

        let prev = self.value.read().expect("value lock poisoned").clone();
        let result = run_caught(|| (self.compute)(prev.as_ref()));

        let scope = context::pop_scope(outer);

        let changed = match result {
            Ok(next) => {
                let had_error = self
                    .flags
                    .read()
                    .expect("flags lock poisoned")
                    .contains(Flags::HAS_ERROR);
                let first_run = self.write_epoch.load(Ordering::SeqCst) == -1;
                let differs = prev.as_ref() != Some(&next);

                if had_error || first_run || differs {
                    self.flags
                        .write()
                        .expect("flags lock poisoned")
                        .remove(Flags::HAS_ERROR);
                    *self.error.write().expect("error lock poisoned") = None;
                    *self.value.write().expect("value lock poisoned") = Some(next);
                    let epoch = runtime::next_write_epoch();
                    self.write_epoch.store(epoch, Ordering::SeqCst);
                    self.realm_epoch.store(epoch, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
            Err(caught) => {
                *self.error.write().expect("error lock poisoned") = Some(caught);
                self.flags
                    .write()
                    .expect("flags lock poisoned")
                    .insert(Flags::HAS_ERROR);
                let epoch = runtime::next_write_epoch();
                self.write_epoch.store(epoch, Ordering::SeqCst);
                self.realm_epoch.store(epoch, Ordering::SeqCst);
                true
            }
        };

        scope.reconcile(&self.deps);
        self.flags
            .write()
            .expect("flags lock poisoned")
            .remove(Flags::RUNNING);

        changed
    }

    /// Get the number of subscribed listeners.
    pub fn dependent_count(&self) -> usize {
        self.dependants
            .read()
            .expect("dependants lock poisoned")
            .len()
    }

    /// Check whether the memo holds a cached value.
    pub fn has_value(&self) -> bool {
        self.value.read().expect("value lock poisoned").is_some()
    }
}

impl<T> ReactiveNode for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn write_epoch(&self) -> i64 {
        self.write_epoch.load(Ordering::SeqCst)
    }

    fn flags(&self) -> Flags {
        *self.flags.read().expect("flags lock poisoned")
    }

    fn set_flags(&self, set: Flags) {
        self.flags.write().expect("flags lock poisoned").insert(set);
    }

    fn clear_flags(&self, clear: Flags) {
        self.flags
            .write()
            .expect("flags lock poisoned")
            .remove(clear);
    }

    fn access_epoch(&self) -> i64 {
        self.access_epoch.load(Ordering::SeqCst)
    }

    fn mark_accessed(&self, epoch: i64) {
        self.access_epoch.store(epoch, Ordering::SeqCst);
    }

    fn refresh(&self) -> bool {
        self.refresh_value()
    }

    /// First dependant arriving activates the memo: it subscribes to every
    /// remembered source so notifications start flowing.
    fn subscribe(&self, listener: &Arc<dyn ReactiveNode>) {
        let became_active = {
            let mut dependants = self.dependants.write().expect("dependants lock poisoned");
            let was_empty = dependants.is_empty();
            dependants.push((listener.id(), Arc::clone(listener)));
            was_empty
        };

        if became_active {
            self.flags
                .write()
                .expect("flags lock poisoned")
                .insert(Flags::TRACKING);
            let deps = self.deps.read().expect("deps lock poisoned").clone();
            let this: Arc<dyn ReactiveNode> = Arc::new(self.clone());
            for dep in deps.iter() {
                dep.subscribe(&this);
            }
        }
    }

    /// Last dependant leaving deactivates the memo: it sheds every source
    /// subscription but keeps the dependency list for reactivation.
    fn unsubscribe(&self, listener: NodeId) {
        let became_inactive = {
            let mut dependants = self.dependants.write().expect("dependants lock poisoned");
            let had_any = !dependants.is_empty();
            dependants.retain(|(id, _)| *id != listener);
            had_any && dependants.is_empty()
        };

        if became_inactive {
            self.flags
                .write()
                .expect("flags lock poisoned")
                .remove(Flags::TRACKING);
            let deps = self.deps.read().expect("deps lock poisoned").clone();
            for dep in deps.iter() {
                dep.unsubscribe(self.id);
            }
        }
    }

    /// Absorb a staleness notification and pass `MAYBE_DIRTY` downstream.
    ///
    /// Receivers can discharge `MAYBE_DIRTY` by epoch comparison, so the
    /// confirmed `DIRTY` never travels further than one edge.
    fn notify(&self, flag: Flags) {
        {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            if flags.intersects(Flags::NOTIFIED | Flags::RUNNING) {
                return;
            }
            flags.insert(flag | Flags::NOTIFIED);
        }

        let dependants = self
            .dependants
            .read()
            .expect("dependants lock poisoned")
            .clone();
        for (_, listener) in dependants.iter() {
            listener.notify(Flags::MAYBE_DIRTY);
        }
    }

    fn dependencies(&self) -> DepList {
        self.deps.read().expect("deps lock poisoned").clone()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            compute: Arc::clone(&self.compute),
            value: Arc::clone(&self.value),
            error: Arc::clone(&self.error),
            flags: Arc::clone(&self.flags),
            write_epoch: Arc::clone(&self.write_epoch),
            access_epoch: Arc::clone(&self.access_epoch),
            realm_epoch: Arc::clone(&self.realm_epoch),
            deps: Arc::clone(&self.deps),
            dependants: Arc::clone(&self.dependants),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("flags", &ReactiveNode::flags(self))
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
