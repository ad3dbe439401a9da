//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately to establish its initial
//!    dependencies. A panic during that first run disposes the effect and
//!    propagates.
//!
//! 2. When a dependency changes, the effect is pushed onto the batch queue.
//!    The scheduler judges staleness at drain time and calls back into
//!    [`Effect::run`] only when the effect really is stale.
//!
//! 3. Each run re-captures dependencies; sources the new control flow no
//!    longer reads are unsubscribed at the end of the run.
//!
//! # Cleanup
//!
//! The effect body may register zero-argument cleanup callbacks. They fire
//! before the next run and on disposal, in registration order, with the
//! current listener cleared and under a batch scope. A panicking cleanup
//! disposes the effect and the panic propagates out of whatever triggered
//! the cleanup.
//!
//! # Differences from Memo
//!
//! - Effects are leaves: nothing can depend on an effect.
//! - Memos are lazy; effects are eager.
//! - An effect's return value is only kept to hand back as `prev` on the
//!   next run.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::context::{self, untrack, TrackingScope};
use super::error::ReactiveError;
use super::flags::Flags;
use super::runtime::{self, BatchScope};
use super::subscriber::{DepList, NodeId, ReactiveNode};

type CleanupFn = Box<dyn FnOnce() + Send>;

/// A side-effecting computation that re-runs when its dependencies change.
///
/// Effects stay live until [`Effect::dispose`] is called; dropping the
/// handle alone does not stop them, because their sources keep them
/// reachable.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let logger = Effect::new(move || {
///     println!("count is {}", count.get());
/// });
///
/// count.set(5); // prints: "count is 5"
/// logger.dispose();
/// ```
pub struct Effect<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this effect.
    id: NodeId,

    /// The effect body, given the previous return value when one exists.
    run_fn: Arc<dyn Fn(Option<&T>) -> T + Send + Sync>,

    /// Return value of the last completed run.
    last: Arc<RwLock<Option<T>>>,

    /// Lifecycle flags; effects are born `TRACKING`.
    flags: Arc<RwLock<Flags>>,

    /// Write-clock value stamped at the end of each run.
    write_epoch: Arc<AtomicI64>,

    /// Sources read during the last run, in read order.
    deps: Arc<RwLock<DepList>>,

    /// Callbacks registered during the last run, drained at the next
    /// teardown.
    cleanups: Arc<Mutex<Vec<CleanupFn>>>,

    /// Number of completed runs.
    run_count: Arc<RwLock<usize>>,
}

impl Effect<()> {
    /// Create a new effect and run it immediately.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::with_prev(move |_: Option<&()>| run())
    }
}

impl<T> Effect<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an effect seeded with an initial previous value.
    ///
    /// The seed is handed to the body as `prev` on the first run only.
    pub fn seeded<F>(init: T, run: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        Self::build(Some(init), move |prev| {
            run(prev.expect("seeded effect always has a previous value"))
        })
    }

    /// Create an effect whose body receives its previous return value, and
    /// run it immediately.
    pub fn with_prev<F>(run: F) -> Self
    where
        F: Fn(Option<&T>) -> T + Send + Sync + 'static,
    {
        Self::build(None, run)
    }

    fn build<F>(seed: Option<T>, run: F) -> Self
    where
        F: Fn(Option<&T>) -> T + Send + Sync + 'static,
    {
        let effect = Self {
            id: NodeId::new(),
            run_fn: Arc::new(run),
            last: Arc::new(RwLock::new(seed)),
            flags: Arc::new(RwLock::new(Flags::TRACKING)),
            write_epoch: Arc::new(AtomicI64::new(-1)),
            deps: Arc::new(RwLock::new(DepList::new())),
            cleanups: Arc::new(Mutex::new(Vec::new())),
            run_count: Arc::new(RwLock::new(0)),
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| effect.run_now())) {
            effect.dispose();
            panic::resume_unwind(payload);
        }

        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Execute one run: tear down the previous run's cleanups, re-capture
    /// dependencies, and keep the return value as the next `prev`.
    fn run_now(&self) {
        let _batch = BatchScope::enter();

        {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            if flags.contains(Flags::DISPOSED) {
                return;
            }
            flags.remove(Flags::STATUS);
            flags.insert(Flags::RUNNING);
        }

        if let Err(payload) = self.flush_cleanups() {
            {
                let mut flags = self.flags.write().expect("flags lock poisoned");
                flags.remove(Flags::RUNNING);
                flags.insert(Flags::DISPOSED);
            }
            self.shed_subscriptions();
            panic::resume_unwind(payload);
        }

        let scope = TrackingScope::new(
            Arc::new(self.clone()),
            runtime::next_read_epoch(),
            self.deps.read().expect("deps lock poisoned").clone(),
        );
        let outer = context::push_scope(scope);

        let prev = self.last.read().expect("value lock poisoned").clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.run_fn)(prev.as_ref())));

        let scope = context::pop_scope(outer);
        scope.reconcile(&self.deps);

        // Stamp the epoch horizon of this run so a later maybe-dirty walk
        // can prove the effect clean.
        self.write_epoch
            .store(runtime::write_clock(), Ordering::SeqCst);

        let disposed_mid_run = {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            flags.remove(Flags::RUNNING);
            flags.contains(Flags::DISPOSED)
        };
        if disposed_mid_run {
            self.shed_subscriptions();
            if let Err(payload) = self.flush_cleanups() {
                if result.is_ok() {
                    panic::resume_unwind(payload);
                }
            }
        }

        match result {
            Ok(value) => {
                *self.last.write().expect("value lock poisoned") = Some(value);
                *self.run_count.write().expect("run_count lock poisoned") += 1;
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Run the pending cleanups in registration order, listener cleared.
    fn flush_cleanups(&self) -> Result<(), Box<dyn Any + Send>> {
        let pending: Vec<CleanupFn> = {
            let mut cleanups = self.cleanups.lock().expect("cleanups lock poisoned");
            std::mem::take(&mut *cleanups)
        };
        if pending.is_empty() {
            return Ok(());
        }

        let _batch = BatchScope::enter();
        let mut first_error: Option<Box<dyn Any + Send>> = None;
        untrack(|| {
            for cb in pending {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cb)) {
                    if first_error.is_none() {
                        first_error = Some(payload);
                    }
                }
            }
        });

        match first_error {
            Some(payload) => Err(payload),
            None => Ok(()),
        }
    }

    /// Unsubscribe from every source and forget the dependency list.
    fn shed_subscriptions(&self) {
        let deps: DepList = {
            let mut deps = self.deps.write().expect("deps lock poisoned");
            std::mem::take(&mut *deps)
        };
        for dep in deps.iter() {
            dep.unsubscribe(self.id);
        }
    }

    /// Dispose of the effect: unsubscribe everywhere and run the pending
    /// cleanups. Idempotent; a disposal issued mid-run completes when the
    /// run finishes.
    pub fn dispose(&self) {
        {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            if flags.contains(Flags::DISPOSED) {
                return;
            }
            flags.insert(Flags::DISPOSED);
            if flags.contains(Flags::RUNNING) {
                return;
            }
        }

        self.shed_subscriptions();
        if let Err(payload) = self.flush_cleanups() {
            panic::resume_unwind(payload);
        }
    }

    /// Check whether the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.flags
            .read()
            .expect("flags lock poisoned")
            .contains(Flags::DISPOSED)
    }

    /// Get the number of completed runs.
    pub fn run_count(&self) -> usize {
        *self.run_count.read().expect("run_count lock poisoned")
    }

    /// Get the number of sources the effect currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.deps.read().expect("deps lock poisoned").len()
    }
}

impl<T> ReactiveNode for Effect<T>
where
    T: Clone + Send + Sync + 'static,
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

    /// Queue the effect for the current drain or the next batch exit.
    fn notify(&self, flag: Flags) {
        {
            let mut flags = self.flags.write().expect("flags lock poisoned");
            if flags.intersects(Flags::NOTIFIED | Flags::RUNNING) || flags.contains(Flags::DISPOSED)
            {
                return;
            }
            flags.insert(flag | Flags::NOTIFIED);
        }
        runtime::enqueue(Arc::new(self.clone()));
    }

    fn dependencies(&self) -> DepList {
        self.deps.read().expect("deps lock poisoned").clone()
    }

    fn run(&self) {
        self.run_now();
    }

    fn register_cleanup(&self, cb: CleanupFn) -> bool {
        self.cleanups
            .lock()
            .expect("cleanups lock poisoned")
            .push(cb);
        true
    }
}

impl<T> Clone for Effect<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            run_fn: Arc::clone(&self.run_fn),
            last: Arc::clone(&self.last),
            flags: Arc::clone(&self.flags),
            write_epoch: Arc::clone(&self.write_epoch),
            deps: Arc::clone(&self.deps),
            cleanups: Arc::clone(&self.cleanups),
            run_count: Arc::clone(&self.run_count),
        }
    }
}

impl<T> Debug for Effect<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register a cleanup on the effect currently running.
///
/// Returns [`ReactiveError::CleanupOutsideEffect`] (and discards `cb`) when
/// no effect body is on the stack, including from inside a memo
/// computation or a cleanup callback.
pub fn try_cleanup<F>(cb: F) -> Result<(), ReactiveError>
where
    F: FnOnce() + Send + 'static,
{
    let registered =
        context::with_current_listener(|listener| listener.register_cleanup(Box::new(cb)))
            .unwrap_or(false);
    if registered {
        Ok(())
    } else {
        Err(ReactiveError::CleanupOutsideEffect)
    }
}

/// Register a cleanup on the effect currently running.
///
/// # Panics
///
/// Panics when called outside a running effect. Use [`try_cleanup`] to
/// discard silently instead.
pub fn cleanup<F>(cb: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(err) = try_cleanup(cb) {
        panic!("{err}");
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal::Signal;
    use std::panic::catch_unwind;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_in = runs.clone();

        let _effect = Effect::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_reruns_when_source_changes() {
        let source = Signal::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let source_in = source.clone();
        let observed_in = observed.clone();
        let effect = Effect::new(move || {
            observed_in.store(source_in.get(), Ordering::SeqCst);
        });

        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert_eq!(effect.dependency_count(), 1);

        source.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn equal_write_does_not_rerun() {
        let source = Signal::new(5);
        let source_in = source.clone();

        let effect = Effect::new(move || {
            source_in.get();
        });

        source.set(5);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_receives_previous_return_value() {
        let source = Signal::new(1);
        let source_in = source.clone();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_in = seen.clone();

        let _effect = Effect::with_prev(move |prev: Option<&i32>| {
            seen_in.write().unwrap().push(prev.copied());
            source_in.get()
        });

        source.set(2);
        source.set(3);

        assert_eq!(*seen.read().unwrap(), vec![None, Some(1), Some(2)]);
    }

    #[test]
    fn seeded_effect_sees_the_seed_as_prev() {
        let source = Signal::new(5);
        let source_in = source.clone();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_in = seen.clone();

        let _effect = Effect::seeded(100, move |prev: &i32| {
            seen_in.write().unwrap().push(*prev);
            source_in.get()
        });

        source.set(6);

        assert_eq!(*seen.read().unwrap(), vec![100, 5]);
    }

    #[test]
    fn disposed_effect_does_not_run_and_unsubscribes() {
        let source = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));

        let source_in = source.clone();
        let runs_in = runs.clone();
        let effect = Effect::new(move || {
            source_in.get();
            runs_in.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(source.subscriber_count(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);

        source.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let fired = Arc::new(AtomicI32::new(0));
        let fired_in = fired.clone();

        let effect = Effect::new(move || {
            let fired = fired_in.clone();
            cleanup(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        });

        effect.dispose();
        effect.dispose();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanups_fire_before_next_run_in_order() {
        let source = Signal::new(1);
        let log = Arc::new(RwLock::new(Vec::new()));

        let source_in = source.clone();
        let log_in = log.clone();
        let _effect = Effect::new(move || {
            let value = source_in.get();
            let log_a = log_in.clone();
            let log_b = log_in.clone();
            cleanup(move || log_a.write().unwrap().push("first".to_string()));
            cleanup(move || log_b.write().unwrap().push("second".to_string()));
            log_in.write().unwrap().push(format!("run {value}"));
        });

        source.set(2);

        assert_eq!(
            *log.read().unwrap(),
            vec!["run 1", "first", "second", "run 2"]
        );
    }

    #[test]
    fn cleanup_panic_disposes_and_propagates() {
        let source = Signal::new(0);
        let source_in = source.clone();

        let effect = Effect::new(move || {
            source_in.get();
            cleanup(|| panic!("cleanup failed"));
        });

        // The re-run tears down the previous cleanups; the panic surfaces
        // once the drain completes.
        let result = catch_unwind(AssertUnwindSafe(|| source.set(1)));
        assert!(result.is_err());
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);

        // Disposed effects ignore further writes.
        source.set(2);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn first_run_panic_disposes_and_reraises() {
        let source = Signal::new(0);
        let source_in = source.clone();

        let result = catch_unwind(AssertUnwindSafe(|| {
            Effect::new(move || {
                source_in.get();
                panic!("first run failed");
            })
        }));

        assert!(result.is_err());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn self_dispose_during_run_completes_teardown() {
        let source = Signal::new(0);
        let slot: Arc<RwLock<Option<Effect<()>>>> = Arc::new(RwLock::new(None));

        let source_in = source.clone();
        let slot_in = slot.clone();
        let effect = Effect::new(move || {
            if source_in.get() > 0 {
                if let Some(me) = slot_in.read().unwrap().as_ref() {
                    me.dispose();
                }
            }
        });
        *slot.write().unwrap() = Some(effect.clone());

        source.set(1);
        assert!(effect.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn try_cleanup_outside_effect_is_an_error() {
        let result = try_cleanup(|| {});
        assert!(matches!(result, Err(ReactiveError::CleanupOutsideEffect)));
    }

    #[test]
    fn cleanup_outside_effect_panics() {
        let result = catch_unwind(|| cleanup(|| {}));
        assert!(result.is_err());
    }

    #[test]
    fn cleanup_inside_memo_is_rejected() {
        use crate::reactive::memo::Memo;

        let outcome = Arc::new(RwLock::new(None));
        let outcome_in = outcome.clone();

        let memo = Memo::new(move || {
            *outcome_in.write().unwrap() = Some(try_cleanup(|| {}).is_err());
            0
        });

        let _effect = Effect::new(move || {
            memo.get();
        });

        assert_eq!(*outcome.read().unwrap(), Some(true));
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect1.run_count(), 1);
        assert_eq!(effect2.run_count(), 1);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
