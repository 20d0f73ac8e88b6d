//! Accessor strategies.
//!
//! Every cell read and write in the system is routed through whichever
//! strategy is currently installed. The default strategy applies writes
//! immediately and notifies subscribers; the atomic strategy (see
//! `transaction`) buffers writes and defers notification to a commit pass.
//! Swapping the strategy changes the meaning of every access in the system
//! without any change to cell code.
//!
//! The active strategy is a thread-local stack with strict push/pop: a guard
//! restores the previous strategy on every exit path, including panics. Cells
//! consult the top of the stack at access time, never a strategy captured at
//! creation, because the same cell is read under default semantics outside
//! transactions and under buffering semantics inside them.
//!
//! Strategies operate on type-erased views of cell state. `ErasedValue` is a
//! shared `Any`; the typed cell on either side of a strategy call performs
//! the downcasts.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::identity::CellId;
use super::subscribable::SubscriptionRecord;

/// A cell value with its concrete type erased.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Recover a typed value from an erased one.
///
/// Values only ever round-trip through the strategy layer for the cell that
/// produced them, so a mismatch is an internal invariant violation.
pub(crate) fn downcast_value<T: Clone + Send + Sync + 'static>(value: ErasedValue) -> T {
    let value = value
        .downcast::<T>()
        .expect("cell value type changed while routed through a strategy");
    Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())
}

/// Type-erased view of an independent cell, as the strategy layer sees it.
pub(crate) trait IndependentHandle: Send + Sync {
    fn id(&self) -> CellId;

    /// Current stored value.
    fn load(&self) -> ErasedValue;

    /// Replace the stored value. The caller has already applied the equality
    /// gate.
    fn store(&self, value: ErasedValue);

    /// Equality-comparer gate: true when the comparer deems the write a no-op.
    fn unchanged(&self, current: &ErasedValue, new: &ErasedValue) -> bool;

    /// Snapshot of the cell's current subscriptions.
    fn subscription_records(&self) -> Vec<SubscriptionRecord>;

    /// Notify subscribers with the current value.
    fn notify_current(&self);
}

/// Type-erased view of a computed cell.
pub(crate) trait DependentHandle: Send + Sync {
    /// Identity of the cell and of its evaluator callback.
    fn id(&self) -> CellId;

    fn has_evaluated(&self) -> bool;

    /// Run the evaluator now, rebuilding the upstream subscription set.
    fn evaluate(&self);

    /// An upstream cell this cell subscribes to has changed.
    fn dependency_changed(&self);

    /// Snapshot of this cell's own subscribers, for the transitive walk.
    fn subscription_records(&self) -> Vec<SubscriptionRecord>;
}

/// The operations a strategy interposes on.
///
/// Dependent-cell writes are deliberately absent: they delegate to the
/// cell's writer function in every phase and have no directly observable
/// effect of their own, so there is nothing for a strategy to interpose.
pub(crate) trait AccessStrategy: 'static {
    /// Read an independent cell's value.
    fn independent_read(&self, cell: &Arc<dyn IndependentHandle>) -> ErasedValue;

    /// Write an independent cell. The strategy applies the equality gate.
    fn independent_write(&self, cell: &Arc<dyn IndependentHandle>, new_value: ErasedValue);

    /// A computed cell is about to be read; ensure its cache is usable.
    fn dependent_read(&self, cell: &Arc<dyn DependentHandle>);

    /// A cell's contents were mutated in place (`notify_changed`).
    fn mutation_broadcast(&self, cell: &Arc<dyn IndependentHandle>);

    /// A computed cell finished re-evaluating and would like to notify its
    /// subscribers.
    fn reevaluation_broadcast(&self, notify: &dyn Fn());
}

/// Immediate-passthrough semantics: writes mutate and notify on the spot,
/// computed cells notify as soon as they re-evaluate.
pub(crate) struct DefaultStrategy;

impl AccessStrategy for DefaultStrategy {
    fn independent_read(&self, cell: &Arc<dyn IndependentHandle>) -> ErasedValue {
        cell.load()
    }

    fn independent_write(&self, cell: &Arc<dyn IndependentHandle>, new_value: ErasedValue) {
        let current = cell.load();
        if cell.unchanged(&current, &new_value) {
            return;
        }
        cell.store(new_value);
        cell.notify_current();
    }

    fn dependent_read(&self, cell: &Arc<dyn DependentHandle>) {
        if !cell.has_evaluated() {
            cell.evaluate();
        }
    }

    fn mutation_broadcast(&self, cell: &Arc<dyn IndependentHandle>) {
        cell.notify_current();
    }

    fn reevaluation_broadcast(&self, notify: &dyn Fn()) {
        notify();
    }
}

thread_local! {
    /// Stack of installed strategies; empty means the default strategy.
    static ACTIVE: RefCell<Vec<Rc<dyn AccessStrategy>>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` against the currently active strategy.
///
/// The stack borrow is released before `f` runs, so strategy methods may
/// themselves trigger further strategy-routed accesses.
pub(crate) fn with_active<R>(f: impl FnOnce(&dyn AccessStrategy) -> R) -> R {
    let top = ACTIVE.with(|stack| stack.borrow().last().cloned());
    match top {
        Some(strategy) => f(strategy.as_ref()),
        None => f(&DefaultStrategy),
    }
}

/// Scoped installation of a strategy; the previous one is restored on drop.
pub(crate) struct StrategyGuard {
    _private: (),
}

impl StrategyGuard {
    pub(crate) fn install(strategy: Rc<dyn AccessStrategy>) -> Self {
        ACTIVE.with(|stack| stack.borrow_mut().push(strategy));
        Self { _private: () }
    }
}

impl Drop for StrategyGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
