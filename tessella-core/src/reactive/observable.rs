//! Independent cells.
//!
//! An `Observable` is the fundamental reactive primitive: a value container
//! with an equality-comparer gate and change notification.
//!
//! # How it works
//!
//! 1. When an observable is read during a computed cell's evaluation, the
//!    observable registers itself as a dependency of that cell.
//!
//! 2. A write first passes the equality gate: if the comparer says the value
//!    has not changed, the write is silently discarded. No mutation, no
//!    notification. Transactions rely on this to drop write sequences that
//!    net out to the original value.
//!
//! 3. A write that passes the gate is routed through the active accessor
//!    strategy. Outside a transaction it mutates and notifies immediately;
//!    inside one it is buffered until commit.
//!
//! # Thread safety
//!
//! Handles are cheaply cloneable and share state through `Arc`; the value
//! sits behind an `RwLock`. Transactions themselves are per-thread: a write
//! is only batched by a transaction running on the writing thread.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::{self, TrackSource};
use super::identity::CellId;
use super::strategy::{self, downcast_value, ErasedValue, IndependentHandle};
use super::subscribable::{Subscribable, Subscription, SubscriptionRecord};

/// A mutable reactive value with no upstream dependencies.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// // Read the value (registers a dependency when inside an evaluation)
/// let value = count.get();
///
/// // Update the value (notifies subscribers, unless gated as a no-op)
/// count.set(5);
/// ```
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<ObservableCore<T>>,
}

struct ObservableCore<T> {
    id: CellId,
    value: Arc<RwLock<T>>,
    /// Returns true when two values are equal, i.e. the write is a no-op.
    /// `None` means every write notifies.
    comparer: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
    subscriptions: Subscribable<T>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an observable whose equality gate is `PartialEq`.
    pub fn new(initial: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_comparer(initial, |old, new| old == new)
    }

    /// Create an observable with a custom equality comparer.
    ///
    /// The comparer receives `(current, incoming)` and returns true when the
    /// incoming write should be discarded as a no-op. A comparer that always
    /// returns false makes every write notify, which is the right choice for
    /// values without a meaningful equality.
    pub fn with_comparer(initial: T, comparer: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            core: Arc::new(ObservableCore {
                id: CellId::next(),
                value: Arc::new(RwLock::new(initial)),
                comparer: Some(Arc::new(comparer)),
                subscriptions: Subscribable::new(),
            }),
        }
    }

    /// The cell's unique id.
    pub fn id(&self) -> CellId {
        self.core.id
    }

    /// Read the current value.
    ///
    /// Registers this cell with the dependency-detection context, then reads
    /// through the active strategy; inside a transaction this returns the
    /// buffered value written earlier in the same transaction, if any.
    pub fn get(&self) -> T {
        context::register_dependency(self.core.clone() as Arc<dyn TrackSource>);
        let handle = self.core.clone() as Arc<dyn IndependentHandle>;
        downcast_value(strategy::with_active(|s| s.independent_read(&handle)))
    }

    /// Read the current stored value without registering a dependency and
    /// without consulting the active strategy.
    pub fn get_untracked(&self) -> T {
        self.core.value.read().clone()
    }

    /// Write a new value through the active strategy.
    ///
    /// Discarded silently when the equality comparer reports no change:
    /// no mutation, no notification, no dependent re-evaluation.
    pub fn set(&self, value: T) {
        let handle = self.core.clone() as Arc<dyn IndependentHandle>;
        strategy::with_active(|s| s.independent_write(&handle, Arc::new(value)));
    }

    /// Update the value with a function of the current value.
    ///
    /// Reads through the active strategy, so inside a transaction the
    /// function sees this transaction's buffered value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let handle = self.core.clone() as Arc<dyn IndependentHandle>;
        let current: T = downcast_value(strategy::with_active(|s| s.independent_read(&handle)));
        self.set(f(&current));
    }

    /// Force the post-write notification path without changing the value.
    ///
    /// For cells holding containers mutated in place: the reference did not
    /// change, but the contents did. Inside a transaction the broadcast is
    /// queued and folded into the commit like any other write.
    pub fn notify_changed(&self) {
        let handle = self.core.clone() as Arc<dyn IndependentHandle>;
        strategy::with_active(|s| s.mutation_broadcast(&handle));
    }

    /// Register an autonomous listener, called with each new value.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.subscriptions.add(Arc::new(callback), None)
    }

    /// Number of current subscriptions (tracked and autonomous).
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriptions.len()
    }
}

impl<T> IndependentHandle for ObservableCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> CellId {
        self.id
    }

    fn load(&self) -> ErasedValue {
        Arc::new(self.value.read().clone())
    }

    fn store(&self, value: ErasedValue) {
        match value.downcast::<T>() {
            Ok(value) => {
                *self.value.write() = Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone());
            }
            Err(_) => debug_assert!(false, "observable value type mismatch"),
        }
    }

    fn unchanged(&self, current: &ErasedValue, new: &ErasedValue) -> bool {
        match (current.downcast_ref::<T>(), new.downcast_ref::<T>()) {
            (Some(current), Some(new)) => match &self.comparer {
                Some(eq) => eq(current, new),
                None => false,
            },
            _ => {
                debug_assert!(false, "observable value type mismatch");
                false
            }
        }
    }

    fn subscription_records(&self) -> Vec<SubscriptionRecord> {
        let value = Arc::clone(&self.value);
        self.subscriptions
            .records(self.id, Arc::new(move || Some(value.read().clone())))
    }

    fn notify_current(&self) {
        let current = self.value.read().clone();
        self.subscriptions.notify_subscribers(&current);
    }
}

impl<T> TrackSource for ObservableCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> CellId {
        self.id
    }

    fn subscribe_tracked(&self, owner: &Arc<dyn super::strategy::DependentHandle>) -> Subscription {
        let weak = Arc::downgrade(owner);
        let callback = move |_: &T| {
            if let Some(owner) = weak.upgrade() {
                owner.dependency_changed();
            }
        };
        self.subscriptions
            .add(Arc::new(callback), Some(Arc::downgrade(owner)))
    }
}

impl<T> Clone for Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Observable<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.core.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
