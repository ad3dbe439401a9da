//! Reactive Runtime
//!
//! The runtime owns the two engine clocks and the batch scheduler that
//! coalesces effect re-runs.
//!
//! # How Batching Works
//!
//! 1. Entering a batch bumps a depth counter; nested batches only track
//!    depth.
//!
//! 2. Writes performed anywhere inside the batch push notified effects onto
//!    a queue instead of running them.
//!
//! 3. When the outermost batch exits, the queue drains in waves: each wave
//!    takes the current queue, runs the still-stale effects, and any writes
//!    those runs perform feed the next wave.
//!
//! 4. The first panic raised by an effect is remembered; the drain finishes
//!    the remaining effects and re-raises it at the end.
//!
//! # Clocks
//!
//! `write_clock` ticks on every value-changing write and stamps the source
//! that changed. `read_clock` ticks once per listener run and stamps that
//! run's identity for dependency de-duplication. Both are process-wide
//! atomics; the batch queue and depth are thread-local, so independent
//! graphs on different threads never share a scheduler.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::flags::Flags;
use super::subscriber::{is_stale, ReactiveNode};

/// Default ceiling on drain waves within a single batch flush.
///
/// A drain that reaches this many waves is in a write feedback loop (an
/// effect keeps re-dirtying its own inputs). Once the ceiling is hit,
/// signal writes stop notifying for the remainder of the drain, so the loop
/// terminates at the cost of coherence: downstream state stays stale until
/// the next write after the drain completes. Valid programs never get near
/// the ceiling.
pub const DEFAULT_MAX_BATCH_ITERATIONS: u32 = 100;

static WRITE_CLOCK: AtomicI64 = AtomicI64::new(0);
static READ_CLOCK: AtomicI64 = AtomicI64::new(0);

/// Per-thread scheduler state.
struct BatchState {
    depth: usize,
    iteration: u32,
    draining: bool,
    queue: Vec<Arc<dyn ReactiveNode>>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState {
        depth: 0,
        iteration: 0,
        draining: false,
        queue: Vec::new(),
    });

    // Configured per thread, like the scheduler it bounds.
    static MAX_BATCH_ITERATIONS: Cell<u32> = const { Cell::new(DEFAULT_MAX_BATCH_ITERATIONS) };
}

/// Current value of the write clock.
pub(crate) fn write_clock() -> i64 {
    WRITE_CLOCK.load(Ordering::SeqCst)
}

/// Tick the write clock and return the new epoch.
pub(crate) fn next_write_epoch() -> i64 {
    WRITE_CLOCK.fetch_add(1, Ordering::SeqCst) + 1
}

/// Stamp a fresh listener-run identity from the read clock.
pub(crate) fn next_read_epoch() -> i64 {
    READ_CLOCK.fetch_add(1, Ordering::SeqCst)
}

/// The active ceiling on drain waves. See [`DEFAULT_MAX_BATCH_ITERATIONS`].
pub fn max_batch_iterations() -> u32 {
    MAX_BATCH_ITERATIONS.with(|limit| limit.get())
}

/// Override the drain-wave ceiling for this thread's scheduler. Values
/// below 1 are clamped to 1.
pub fn set_max_batch_iterations(limit: u32) {
    MAX_BATCH_ITERATIONS.with(|cell| cell.set(limit.max(1)));
}

/// True while the current drain has exhausted its wave budget; writes skip
/// notification entirely in that window.
pub(crate) fn notifications_suppressed() -> bool {
    BATCH.with(|b| b.borrow().iteration >= max_batch_iterations())
}

/// RAII batch region. Dropping the outermost scope drains the queue.
pub(crate) struct BatchScope {
    _priv: (),
}

impl BatchScope {
    pub(crate) fn enter() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        Self { _priv: () }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let should_drain = BATCH.with(|b| {
            let mut state = b.borrow_mut();
            state.depth -= 1;
            state.depth == 0 && !state.draining && !state.queue.is_empty()
        });
        // Draining during an unwind would run user code mid-panic; the
        // queue survives until the next outermost batch exit instead.
        if should_drain && !std::thread::panicking() {
            drain();
        }
    }
}

/// Execute `f` under a batch scope and return its result.
///
/// Writes inside the scope are coalesced: an effect reading two signals
/// both written in the same batch sees both final values and runs once.
/// Nested calls are flattened; only the outermost exit drains.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::enter();
    f()
}

/// Queue an effect for the current drain or the next outermost batch exit.
pub(crate) fn enqueue(effect: Arc<dyn ReactiveNode>) {
    BATCH.with(|b| b.borrow_mut().queue.push(effect));
}

/// Drain the queue in waves until no effect re-enqueues.
fn drain() {
    BATCH.with(|b| b.borrow_mut().draining = true);

    let mut first_error: Option<Box<dyn Any + Send>> = None;
    let limit = max_batch_iterations();

    loop {
        let wave = BATCH.with(|b| std::mem::take(&mut b.borrow_mut().queue));
        if wave.is_empty() {
            break;
        }

        let iteration = BATCH.with(|b| {
            let mut state = b.borrow_mut();
            state.iteration += 1;
            state.iteration
        });
        if iteration == limit {
            tracing::warn!(
                iteration,
                "batch iteration guard tripped; writes stop notifying for the rest of this drain"
            );
        }

        // Notification pushed to the back; reverse iteration yields the
        // LIFO order the queue contract promises within a wave.
        for effect in wave.iter().rev() {
            effect.clear_flags(Flags::NOTIFIED);
            let flags = effect.flags();
            if flags.contains(Flags::DISPOSED) {
                continue;
            }
            if is_stale(flags, effect.write_epoch(), &effect.dependencies()) {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| effect.run())) {
                    if first_error.is_none() {
                        first_error = Some(payload);
                    }
                }
            } else {
                // Proven clean; drop the stale hint so the next wave does
                // not re-walk the dependency list for nothing.
                effect.clear_flags(Flags::STATUS);
            }
        }
    }

    BATCH.with(|b| {
        let mut state = b.borrow_mut();
        state.iteration = 0;
        state.draining = false;
    });

    if let Some(payload) = first_error {
        panic::resume_unwind(payload);
    }
}
