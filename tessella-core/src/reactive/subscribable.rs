//! The publish/subscribe primitive.
//!
//! Every cell owns a `Subscribable`: an ordered list of subscriptions, each a
//! callback plus an optional back-reference to the computed cell it belongs
//! to. Subscriptions with a back-reference are *tracked* (created by
//! dependency detection); subscriptions without one are *autonomous*
//! (explicit external listeners). The transaction engine classifies the two
//! very differently, so the distinction is recorded at subscription time.
//!
//! Notification snapshots the subscription list before iterating, so a
//! callback may freely subscribe or unsubscribe during a notification pass.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::identity::CellId;
use super::strategy::DependentHandle;

/// One subscription held by a `Subscribable`.
pub(crate) struct SubscriptionEntry<T> {
    id: CellId,
    callback: Arc<dyn Fn(&T) + Send + Sync>,
    /// Back-reference to the computed cell that owns this subscription, if
    /// any. Weak: a subscription never keeps its owner alive.
    tracked: Option<Weak<dyn DependentHandle>>,
}

impl<T> Clone for SubscriptionEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            tracked: self.tracked.clone(),
        }
    }
}

type EntryList<T> = SmallVec<[SubscriptionEntry<T>; 2]>;

/// Ordered set of subscriptions with snapshot-then-iterate notification.
pub(crate) struct Subscribable<T> {
    entries: Arc<Mutex<EntryList<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Subscribable<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(SmallVec::new())),
        }
    }

    /// Append a subscription and return its disposable handle.
    pub(crate) fn add(
        &self,
        callback: Arc<dyn Fn(&T) + Send + Sync>,
        tracked: Option<Weak<dyn DependentHandle>>,
    ) -> Subscription {
        let id = CellId::next();
        self.entries.lock().push(SubscriptionEntry {
            id,
            callback,
            tracked,
        });

        let entries = Arc::downgrade(&self.entries);
        Subscription::new(Arc::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().retain(|entry| entry.id != id);
            }
        }))
    }

    /// Invoke every current subscription's callback with `value`, in
    /// subscription order.
    pub(crate) fn notify_subscribers(&self, value: &T) {
        let snapshot: EntryList<T> = self.entries.lock().clone();
        for entry in &snapshot {
            (entry.callback)(value);
        }
    }

    /// Classification snapshot for the transaction engine. `read_current`
    /// reads the owning cell's value at *invoke* time; queued listeners must
    /// observe post-evaluation values, not values frozen at write time.
    pub(crate) fn records(
        &self,
        source: CellId,
        read_current: Arc<dyn Fn() -> Option<T> + Send + Sync>,
    ) -> Vec<SubscriptionRecord> {
        let snapshot: EntryList<T> = self.entries.lock().clone();
        snapshot
            .into_iter()
            .map(|entry| {
                let callback_key = Arc::as_ptr(&entry.callback) as *const () as usize;
                let callback = entry.callback;
                let read = Arc::clone(&read_current);
                SubscriptionRecord {
                    callback_key,
                    source,
                    tracked: entry.tracked,
                    invoke: Arc::new(move || {
                        if let Some(value) = read() {
                            callback(&value);
                        }
                    }),
                }
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A subscription as the transaction engine sees it: callback identity for
/// de-duplication, tracked-or-autonomous classification, and an erased
/// invoker that reads the source's current value.
pub(crate) struct SubscriptionRecord {
    pub(crate) callback_key: usize,
    pub(crate) source: CellId,
    pub(crate) tracked: Option<Weak<dyn DependentHandle>>,
    pub(crate) invoke: Arc<dyn Fn() + Send + Sync>,
}

/// Handle to an active subscription.
///
/// `dispose` removes the subscription and is idempotent. Dropping the handle
/// does *not* unsubscribe; a listener stays registered until explicitly
/// disposed.
pub struct Subscription {
    detach: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(detach: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { detach }
    }

    /// Remove this subscription from its cell. Safe to call more than once.
    pub fn dispose(&self) {
        (self.detach)();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn notifies_in_subscription_order() {
        let subs = Subscribable::<i32>::new();
        let order = Arc::new(PMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            subs.add(Arc::new(move |_: &i32| order.lock().push(tag)), None);
        }

        subs.notify_subscribers(&0);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn dispose_is_idempotent() {
        let subs = Subscribable::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let sub = subs.add(
            Arc::new(move |_: &i32| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        assert_eq!(subs.len(), 1);

        sub.dispose();
        sub.dispose();
        assert_eq!(subs.len(), 0);

        subs.notify_subscribers(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tolerates_unsubscribe_during_notification() {
        let subs = Arc::new(Subscribable::<i32>::new());
        let second_fired = Arc::new(AtomicI32::new(0));

        // The first callback disposes the second one mid-notification; the
        // snapshot taken before iterating still delivers to both.
        let slot: Arc<PMutex<Option<Subscription>>> = Arc::new(PMutex::new(None));
        let slot_clone = slot.clone();
        subs.add(
            Arc::new(move |_: &i32| {
                if let Some(sub) = slot_clone.lock().take() {
                    sub.dispose();
                }
            }),
            None,
        );

        let second_clone = second_fired.clone();
        let second = subs.add(
            Arc::new(move |_: &i32| {
                second_clone.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        *slot.lock() = Some(second);

        subs.notify_subscribers(&0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
        assert_eq!(subs.len(), 1);

        // The disposed subscription is gone on the next pass.
        subs.notify_subscribers(&0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn records_classify_autonomous_subscriptions() {
        let subs = Subscribable::<i32>::new();
        let seen = Arc::new(AtomicI32::new(0));

        let seen_clone = seen.clone();
        subs.add(
            Arc::new(move |value: &i32| {
                seen_clone.store(*value, Ordering::SeqCst);
            }),
            None,
        );

        let source = CellId::next();
        let records = subs.records(source, Arc::new(|| Some(42)));
        assert_eq!(records.len(), 1);
        assert!(records[0].tracked.is_none());
        assert_eq!(records[0].source, source);

        // The invoker reads the current value at call time.
        (records[0].invoke)();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
