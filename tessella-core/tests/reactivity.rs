//! Immediate-mode reactivity: cells, dependents, and subscriptions outside
//! of any transaction.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tessella_core::{Computed, Observable};

#[test]
fn each_write_triggers_one_evaluation() {
    let source = Observable::new(0);
    let count = Arc::new(AtomicI32::new(0));

    let (source_c, count_c) = (source.clone(), count.clone());
    let mirror = Computed::new(move || {
        count_c.fetch_add(1, Ordering::SeqCst);
        source_c.get()
    });

    count.store(0, Ordering::SeqCst);
    source.set(1);
    source.set(2);
    source.set(3);
    assert_eq!(mirror.get(), 3);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn listeners_observe_every_change_in_order() {
    let source = Observable::new(0);
    let observed: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

    let observed_c = observed.clone();
    let _sub = source.subscribe(move |value| {
        observed_c.lock().push(*value);
    });

    source.set(1);
    source.set(1); // gated no-op
    source.set(2);
    assert_eq!(*observed.lock(), vec![1, 2]);
}

#[test]
fn update_reads_its_own_previous_write() {
    let source = Observable::new(10);
    source.update(|v| v * 2);
    source.update(|v| v + 1);
    assert_eq!(source.get(), 21);
}

#[test]
fn conditional_reads_swap_the_dependency_set() {
    let use_fallback = Observable::new(false);
    let primary = Observable::new(String::from("db"));
    let fallback = Observable::new(String::from("cache"));
    let count = Arc::new(AtomicI32::new(0));

    let (flag_c, primary_c, fallback_c, count_c) = (
        use_fallback.clone(),
        primary.clone(),
        fallback.clone(),
        count.clone(),
    );
    let backend = Computed::new(move || {
        count_c.fetch_add(1, Ordering::SeqCst);
        if flag_c.get() {
            fallback_c.get()
        } else {
            primary_c.get()
        }
    });

    assert_eq!(backend.get(), "db");
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // The fallback is not observed yet.
    fallback.set(String::from("memory"));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    use_fallback.set(true);
    assert_eq!(backend.get(), "memory");
    assert_eq!(count.load(Ordering::SeqCst), 2);

    // Now the primary is the unobserved one.
    primary.set(String::from("replica"));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn chained_computeds_propagate_through_every_layer() {
    let base = Observable::new(1);
    let base_c = base.clone();
    let doubled = Computed::new(move || base_c.get() * 2);
    let doubled_c = doubled.clone();
    let squared = Computed::new(move || {
        let v = doubled_c.get();
        v * v
    });
    let squared_c = squared.clone();
    let described = Computed::new(move || format!("value = {}", squared_c.get()));

    assert_eq!(described.get(), "value = 4");
    base.set(3);
    assert_eq!(described.get(), "value = 36");
}

#[test]
fn disposal_detaches_a_computed_mid_chain() {
    let base = Observable::new(1);
    let count = Arc::new(AtomicI32::new(0));

    let (base_c, count_c) = (base.clone(), count.clone());
    let middle = Computed::new(move || {
        count_c.fetch_add(1, Ordering::SeqCst);
        base_c.get() * 10
    });
    let middle_c = middle.clone();
    let top = Computed::new(move || middle_c.get() + 1);

    assert_eq!(top.get(), 11);
    middle.dispose();

    base.set(2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    // Downstream keeps the last value the disposed cell produced.
    assert_eq!(top.get(), 11);
}

#[test]
fn computed_subscriptions_and_tracked_dependents_coexist() {
    let source = Observable::new(1);
    let source_c = source.clone();
    let doubled = Computed::new(move || source_c.get() * 2);

    let observed: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_c = observed.clone();
    let _sub = doubled.subscribe(move |value| {
        observed_c.lock().push(*value);
    });

    let doubled_c = doubled.clone();
    let quadrupled = Computed::new(move || doubled_c.get() * 2);

    source.set(2);
    source.set(5);
    assert_eq!(*observed.lock(), vec![4, 10]);
    assert_eq!(quadrupled.get(), 20);
}

#[test]
fn subscriber_counts_track_attach_and_detach() {
    let source = Observable::new(0);
    assert_eq!(source.subscriber_count(), 0);

    let sub = source.subscribe(|_| {});
    assert_eq!(source.subscriber_count(), 1);

    let source_c = source.clone();
    let dependent = Computed::new(move || source_c.get());
    assert_eq!(source.subscriber_count(), 2);

    sub.dispose();
    assert_eq!(source.subscriber_count(), 1);

    dependent.dispose();
    assert_eq!(source.subscriber_count(), 0);
}
