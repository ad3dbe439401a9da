//! Integration tests for the reactive system.
//!
//! These exercise signals, memos, effects, and the batch scheduler
//! together through the public API.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use weft_core::{batch, cleanup, effect, memo, set_max_batch_iterations, signal, untrack};

type Log<T> = Arc<RwLock<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(RwLock::new(Vec::new()))
}

fn snapshot<T: Clone>(log: &Log<T>) -> Vec<T> {
    log.read().unwrap().clone()
}

#[test]
fn basic_reactivity() {
    let s = signal(1);
    let seen = log();

    let s_in = s.clone();
    let seen_in = seen.clone();
    let _e = effect(move || seen_in.write().unwrap().push(s_in.get()));
    assert_eq!(snapshot(&seen), vec![1]);

    s.set(2);
    assert_eq!(snapshot(&seen), vec![1, 2]);

    // Equal write: no change, no run.
    s.set(2);
    assert_eq!(snapshot(&seen), vec![1, 2]);
}

#[test]
fn batching_coalesces_writes() {
    let a = signal(1);
    let b = signal(2);
    let seen = log();

    let a_in = a.clone();
    let b_in = b.clone();
    let seen_in = seen.clone();
    let _e = effect(move || seen_in.write().unwrap().push(a_in.get() + b_in.get()));
    assert_eq!(snapshot(&seen), vec![3]);

    batch(|| {
        a.set(10);
        b.set(20);
    });

    // Both final values observed by a single run.
    assert_eq!(snapshot(&seen), vec![3, 30]);
}

#[test]
fn nested_batches_are_flattened() {
    let a = signal(1);
    let runs = Arc::new(AtomicI32::new(0));

    let a_in = a.clone();
    let runs_in = runs.clone();
    let _e = effect(move || {
        a_in.get();
        runs_in.fetch_add(1, Ordering::SeqCst);
    });

    batch(|| {
        batch(|| {
            a.set(2);
            a.set(3);
        });
        // Still inside the outer batch: nothing drained yet.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        a.set(4);
    });

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn dynamic_dependencies_follow_control_flow() {
    let c = signal(true);
    let x = signal(1);
    let y = signal(2);
    let seen = log();

    let c_in = c.clone();
    let x_in = x.clone();
    let y_in = y.clone();
    let seen_in = seen.clone();
    let e = effect(move || {
        let value = if c_in.get() { x_in.get() } else { y_in.get() };
        seen_in.write().unwrap().push(value);
    });
    assert_eq!(snapshot(&seen), vec![1]);

    // y is not a dependency yet.
    y.set(99);
    assert_eq!(snapshot(&seen), vec![1]);

    c.set(false);
    assert_eq!(snapshot(&seen), vec![1, 99]);

    // x dropped out of the dependency set with the branch switch.
    x.set(5);
    assert_eq!(snapshot(&seen), vec![1, 99]);
    assert_eq!(x.subscriber_count(), 0);
    assert_eq!(y.subscriber_count(), 1);
    assert_eq!(e.dependency_count(), 2);

    y.set(7);
    assert_eq!(snapshot(&seen), vec![1, 99, 7]);
}

#[test]
fn lazy_memo_recomputes_only_when_read() {
    let s = signal(1);
    let k = Arc::new(AtomicI32::new(0));

    let s_in = s.clone();
    let k_in = k.clone();
    let d = memo(move || {
        k_in.fetch_add(1, Ordering::SeqCst);
        s_in.get() * 2
    });
    assert_eq!(k.load(Ordering::SeqCst), 0);

    assert_eq!(d.get(), 2);
    assert_eq!(k.load(Ordering::SeqCst), 1);
    assert_eq!(d.get(), 2);
    assert_eq!(k.load(Ordering::SeqCst), 1);

    // No subscribers: the write is not even noticed.
    s.set(3);
    assert_eq!(k.load(Ordering::SeqCst), 1);

    assert_eq!(d.get(), 6);
    assert_eq!(k.load(Ordering::SeqCst), 2);
}

#[test]
fn memo_shared_under_an_effect() {
    let s = signal(1);
    let k = Arc::new(AtomicI32::new(0));
    let seen = log();

    let s_in = s.clone();
    let k_in = k.clone();
    let d = memo(move || {
        k_in.fetch_add(1, Ordering::SeqCst);
        s_in.get() * 2
    });
    assert_eq!(d.get(), 2);
    assert_eq!(k.load(Ordering::SeqCst), 1);

    let d_in = d.clone();
    let seen_in = seen.clone();
    let _e = effect(move || seen_in.write().unwrap().push(d_in.get()));

    // The effect's first read reuses the cache.
    assert_eq!(snapshot(&seen), vec![2]);
    assert_eq!(k.load(Ordering::SeqCst), 1);
    assert_eq!(d.dependent_count(), 1);
    assert_eq!(s.subscriber_count(), 1);

    s.set(4);
    assert_eq!(snapshot(&seen), vec![2, 8]);
    assert_eq!(k.load(Ordering::SeqCst), 2);
}

#[test]
fn unchanged_memo_discharges_the_notification() {
    let s = signal(1);
    let k = Arc::new(AtomicI32::new(0));
    let runs = Arc::new(AtomicI32::new(0));

    let s_in = s.clone();
    let k_in = k.clone();
    let positive = memo(move || {
        k_in.fetch_add(1, Ordering::SeqCst);
        s_in.get() > 0
    });

    let positive_in = positive.clone();
    let runs_in = runs.clone();
    let _e = effect(move || {
        positive_in.get();
        runs_in.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(k.load(Ordering::SeqCst), 1);

    // The memo recomputes but its value is unchanged, so the effect body
    // never runs.
    s.set(5);
    assert_eq!(k.load(Ordering::SeqCst), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Crossing zero changes the memo and wakes the effect.
    s.set(-1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn diamond_reads_are_glitch_free() {
    let s = signal(1);

    let s_in = s.clone();
    let doubled = memo(move || s_in.get() * 2);

    let pairs: Log<(i32, i32)> = log();
    let s_in = s.clone();
    let doubled_in = doubled.clone();
    let pairs_in = pairs.clone();
    let _e = effect(move || {
        pairs_in
            .write()
            .unwrap()
            .push((s_in.get(), doubled_in.get()));
    });
    assert_eq!(snapshot(&pairs), vec![(1, 2)]);

    s.set(5);

    // One run, both reads from the same instant.
    assert_eq!(snapshot(&pairs), vec![(1, 2), (5, 10)]);
}

#[test]
fn shared_source_read_directly_and_through_a_memo() {
    let s = signal(1);

    let s_in = s.clone();
    let doubled = memo(move || s_in.get() * 2);

    let runs = Arc::new(AtomicI32::new(0));
    let s_in = s.clone();
    let doubled_in = doubled.clone();
    let runs_in = runs.clone();
    let e = effect(move || {
        s_in.get();
        doubled_in.get();
        runs_in.fetch_add(1, Ordering::SeqCst);
    });

    // The signal carries both the effect and the activated memo.
    assert_eq!(s.subscriber_count(), 2);
    assert_eq!(e.dependency_count(), 2);

    s.set(3);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(s.subscriber_count(), 2);
}

#[test]
fn cleanup_runs_between_effect_runs() {
    let s = signal(1);
    let seen: Log<String> = log();

    let s_in = s.clone();
    let seen_in = seen.clone();
    let _e = effect(move || {
        let marker = seen_in.clone();
        cleanup(move || marker.write().unwrap().push("x".to_string()));
        seen_in.write().unwrap().push(s_in.get().to_string());
    });
    assert_eq!(snapshot(&seen), vec!["1"]);

    s.set(2);
    assert_eq!(snapshot(&seen), vec!["1", "x", "2"]);

    s.set(3);
    assert_eq!(snapshot(&seen), vec!["1", "x", "2", "x", "3"]);
}

#[test]
fn untracked_reads_do_not_subscribe() {
    let tracked = signal(1);
    let peeked = signal(10);
    let seen = log();

    let tracked_in = tracked.clone();
    let peeked_in = peeked.clone();
    let seen_in = seen.clone();
    let _e = effect(move || {
        let base = tracked_in.get();
        let extra = untrack(|| peeked_in.get());
        seen_in.write().unwrap().push(base + extra);
    });
    assert_eq!(snapshot(&seen), vec![11]);
    assert_eq!(peeked.subscriber_count(), 0);

    // Writing the untracked signal wakes nothing.
    peeked.set(100);
    assert_eq!(snapshot(&seen), vec![11]);

    // The next genuine run observes the new value.
    tracked.set(2);
    assert_eq!(snapshot(&seen), vec![11, 102]);
}

#[test]
fn effects_run_in_reverse_notification_order_within_a_wave() {
    let s = signal(0);
    let order: Log<&'static str> = log();

    let s_in = s.clone();
    let order_in = order.clone();
    let _first = effect(move || {
        s_in.get();
        order_in.write().unwrap().push("first");
    });

    let s_in = s.clone();
    let order_in = order.clone();
    let _second = effect(move || {
        s_in.get();
        order_in.write().unwrap().push("second");
    });

    order.write().unwrap().clear();
    s.set(1);

    // "first" subscribed first, so it was notified first and runs last.
    assert_eq!(snapshot(&order), vec!["second", "first"]);
}

#[test]
fn disposal_releases_every_subscription() {
    let s = signal(1);

    let s_in = s.clone();
    let d = memo(move || s_in.get() + 1);

    let d_in = d.clone();
    let e = effect(move || {
        d_in.get();
    });

    assert_eq!(s.subscriber_count(), 1);
    assert_eq!(d.dependent_count(), 1);

    e.dispose();

    // The memo lost its last dependant and shed its own subscription.
    assert_eq!(d.dependent_count(), 0);
    assert_eq!(s.subscriber_count(), 0);
    assert_eq!(e.dependency_count(), 0);

    // Writes now touch nobody; the memo stays reusable on demand.
    s.set(10);
    assert_eq!(d.get(), 11);
}

#[test]
fn drain_finishes_remaining_effects_and_reraises_first_error() {
    let s = signal(0);
    let survivor_runs = Arc::new(AtomicI32::new(0));

    let s_in = s.clone();
    let _faulty = effect(move || {
        if s_in.get() > 0 {
            panic!("faulty effect");
        }
    });

    let s_in = s.clone();
    let survivor_in = survivor_runs.clone();
    let _survivor = effect(move || {
        s_in.get();
        survivor_in.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(survivor_runs.load(Ordering::SeqCst), 1);

    let result = catch_unwind(AssertUnwindSafe(|| s.set(1)));
    assert!(result.is_err());

    // The panic did not starve the other effect in the same wave.
    assert_eq!(survivor_runs.load(Ordering::SeqCst), 2);

    // A failing body does not dispose the effect; the value still landed.
    assert_eq!(s.get_untracked(), 1);
    assert_eq!(s.subscriber_count(), 2);
}

#[test]
fn write_feedback_loops_are_bounded() {
    // Two effects that keep re-dirtying each other's input would drain
    // forever; the iteration guard cuts notification instead.
    set_max_batch_iterations(20);

    let a = signal(0);
    let b = signal(0);

    let a_in = a.clone();
    let b_in = b.clone();
    let _forward = effect(move || {
        let next = a_in.get() + 1;
        b_in.set(next);
    });

    let a_in = a.clone();
    let b_in = b.clone();
    let _backward = effect(move || {
        let next = b_in.get() + 1;
        a_in.set(next);
    });

    // Terminates because the guard suppresses notifications past the
    // ceiling; without it this write would never return.
    a.set(1);

    assert!(a.get_untracked() >= 1);
    assert!(b.get_untracked() >= 1);
}

#[test]
fn batch_in_batch_matches_plain_batch() {
    let run_with = |nested: bool| -> Vec<i32> {
        let s = signal(0);
        let seen = log();

        let s_in = s.clone();
        let seen_in = seen.clone();
        let _e = effect(move || seen_in.write().unwrap().push(s_in.get()));

        let body = || {
            s.set(1);
            s.set(2);
        };
        if nested {
            batch(|| batch(body));
        } else {
            batch(body);
        }

        snapshot(&seen)
    };

    assert_eq!(run_with(false), run_with(true));
}

#[test]
fn memo_chain_activates_and_deactivates_transitively() {
    let s = signal(2);

    let s_in = s.clone();
    let squared = memo(move || {
        let v = s_in.get();
        v * v
    });

    let squared_in = squared.clone();
    let shifted = memo(move || squared_in.get() + 1);

    assert_eq!(shifted.get(), 5);
    assert_eq!(s.subscriber_count(), 0);

    let shifted_in = shifted.clone();
    let e = effect(move || {
        shifted_in.get();
    });

    // Subscriptions reach all the way down.
    assert_eq!(shifted.dependent_count(), 1);
    assert_eq!(squared.dependent_count(), 1);
    assert_eq!(s.subscriber_count(), 1);

    s.set(3);
    assert_eq!(shifted.get(), 10);

    e.dispose();

    // And unwind all the way down.
    assert_eq!(shifted.dependent_count(), 0);
    assert_eq!(squared.dependent_count(), 0);
    assert_eq!(s.subscriber_count(), 0);
}
