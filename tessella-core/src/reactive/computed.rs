//! Dependent cells.
//!
//! A `Computed` derives its value from other cells by running an evaluator
//! closure. Dependencies are not declared: they are discovered by observing
//! which cells the evaluator reads, and re-discovered from scratch on every
//! evaluation, so a conditional read changes the dependency set.
//!
//! # How it works
//!
//! 1. Evaluation pushes a frame on the dependency-detection stack, runs the
//!    evaluator, and collects every cell the closure read.
//!
//! 2. All previous upstream subscriptions are disposed and fresh tracked
//!    subscriptions are taken against the cells just read. Stale edges
//!    cannot survive an evaluation.
//!
//! 3. A change in any upstream cell triggers re-evaluation, which in turn
//!    notifies this cell's own subscribers through the active strategy:
//!    immediately outside a transaction, deferred inside one.
//!
//! Evaluation is eager: the cell evaluates once at construction so it is
//! subscribed to its dependencies from the start.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::error::ReactiveError;

use super::context::{self, EvaluationScope, TrackSource};
use super::identity::CellId;
use super::strategy::{self, DependentHandle};
use super::subscribable::{Subscribable, Subscription, SubscriptionRecord};

/// A read-only (or optionally writable) cell computed from other cells.
///
/// # Example
///
/// ```rust,ignore
/// let first = Observable::new(String::from("Ada"));
/// let last = Observable::new(String::from("Lovelace"));
/// let full = Computed::new(move || format!("{} {}", first.get(), last.get()));
///
/// assert_eq!(full.get(), "Ada Lovelace");
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<ComputedCore<T>>,
}

struct ComputedCore<T> {
    id: CellId,
    evaluator: Arc<dyn Fn() -> T + Send + Sync>,
    writer: Option<Arc<dyn Fn(T) + Send + Sync>>,
    value: Arc<RwLock<Option<T>>>,
    evaluated: AtomicBool,
    evaluating: AtomicBool,
    disposed: AtomicBool,
    upstream: Mutex<SmallVec<[Subscription; 4]>>,
    subscriptions: Subscribable<T>,
    weak_self: Weak<ComputedCore<T>>,
}

/// Resets the `evaluating` flag when an evaluation unwinds.
struct EvaluatingReset<'a>(&'a AtomicBool);

impl Drop for EvaluatingReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a read-only computed cell and evaluate it immediately.
    pub fn new(evaluator: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::build(Arc::new(evaluator), None)
    }

    /// Create a computed cell that also accepts writes.
    ///
    /// The writer receives the written value and decides what it means,
    /// typically by writing back into the cells the evaluator reads.
    pub fn writable(
        evaluator: impl Fn() -> T + Send + Sync + 'static,
        writer: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self::build(Arc::new(evaluator), Some(Arc::new(writer)))
    }

    fn build(evaluator: Arc<dyn Fn() -> T + Send + Sync>, writer: Option<Arc<dyn Fn(T) + Send + Sync>>) -> Self {
        let core = Arc::new_cyclic(|weak_self| ComputedCore {
            id: CellId::next(),
            evaluator,
            writer,
            value: Arc::new(RwLock::new(None)),
            evaluated: AtomicBool::new(false),
            evaluating: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            upstream: Mutex::new(SmallVec::new()),
            subscriptions: Subscribable::new(),
            weak_self: weak_self.clone(),
        });
        core.evaluate();
        Self { core }
    }

    /// The cell's unique id.
    pub fn id(&self) -> CellId {
        self.core.id
    }

    /// Read the current value.
    ///
    /// Registers this cell with the dependency-detection context. During the
    /// publish phase of a transaction, reading a dependent cell that is
    /// queued but not yet re-evaluated forces its evaluation first, so reads
    /// always see post-commit values.
    pub fn get(&self) -> T {
        let handle = self.core.clone() as Arc<dyn DependentHandle>;
        strategy::with_active(|s| s.dependent_read(&handle));
        context::register_dependency(self.core.clone() as Arc<dyn TrackSource>);
        self.core
            .value
            .read()
            .clone()
            .expect("computed cell read during its own first evaluation")
    }

    /// Write through to the writer, if one was provided at construction.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        match &self.core.writer {
            Some(writer) => {
                writer(value);
                Ok(())
            }
            None => Err(ReactiveError::ReadOnlyComputed),
        }
    }

    /// Whether this cell was constructed with a writer.
    pub fn is_writable(&self) -> bool {
        self.core.writer.is_some()
    }

    /// Register an autonomous listener, called with each re-evaluated value.
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

    /// Detach from all upstream cells. The cell keeps its last value but
    /// never re-evaluates again.
    pub fn dispose(&self) {
        self.core.disposed.store(true, Ordering::SeqCst);
        let mut upstream = self.core.upstream.lock();
        for sub in upstream.drain(..) {
            sub.dispose();
        }
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::SeqCst)
    }
}

impl<T> ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn evaluate(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.evaluating.swap(true, Ordering::SeqCst) {
            tracing::warn!(id = ?self.id, "re-entrant evaluation of a computed cell skipped");
            return;
        }
        let _reset = EvaluatingReset(&self.evaluating);

        let scope = EvaluationScope::enter(self.id);
        let value = (self.evaluator)();
        let sources = scope.finish();

        let owner: Arc<dyn DependentHandle> = self.clone();
        {
            let mut upstream = self.upstream.lock();
            for sub in upstream.drain(..) {
                sub.dispose();
            }
            for source in &sources {
                if source.id() == self.id {
                    continue;
                }
                upstream.push(source.subscribe_tracked(&owner));
            }
        }

        *self.value.write() = Some(value);
        self.evaluated.store(true, Ordering::SeqCst);

        strategy::with_active(|s| {
            s.reevaluation_broadcast(&|| self.notify_current());
        });
    }

    fn notify_current(&self) {
        let current = self.value.read().clone();
        if let Some(current) = current {
            self.subscriptions.notify_subscribers(&current);
        }
    }
}

impl<T> DependentHandle for ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> CellId {
        self.id
    }

    fn has_evaluated(&self) -> bool {
        self.evaluated.load(Ordering::SeqCst)
    }

    fn evaluate(&self) {
        if let Some(strong) = self.weak_self.upgrade() {
            strong.evaluate();
        }
    }

    fn dependency_changed(&self) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.evaluate();
        }
    }

    fn subscription_records(&self) -> Vec<SubscriptionRecord> {
        let value = Arc::clone(&self.value);
        self.subscriptions.records(self.id, Arc::new(move || value.read().clone()))
    }
}

impl<T> TrackSource for ComputedCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> CellId {
        self.id
    }

    fn subscribe_tracked(&self, owner: &Arc<dyn DependentHandle>) -> Subscription {
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

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.core.id)
            .field("value", &*self.core.value.read())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
