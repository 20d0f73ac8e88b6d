//! Transactional batching.
//!
//! `atomically` runs a closure with all cell writes buffered, then commits:
//! dependents re-evaluate at most once per round and autonomous listeners
//! fire at most once per source, always with post-commit values.
//!
//! # How it works
//!
//! 1. **Write phase.** An atomic strategy is installed for the duration of
//!    the closure. Writes land in a pending map keyed by cell id,
//!    last-write-wins. Reads of a pending cell return its buffered value, so
//!    the transaction reads its own writes. Nothing is published.
//!
//! 2. **Commit.** Each buffered write replays through the real write path in
//!    first-write order. The equality gate compares against the true
//!    pre-transaction value, so a write sequence that nets out to the
//!    original value publishes nothing. Instead of notifying, publication is
//!    intercepted: the subscriber graph is walked, dependents are collected
//!    into an ordered queue (each at most once, diamonds and cycles
//!    included) and autonomous listeners into a deduplicated list.
//!
//! 3. **Publish phase.** Each queued dependent is evaluated once. A
//!    dependent that reads another queued-but-not-yet-evaluated dependent
//!    forces it on the spot, so evaluation order never produces a stale
//!    read. Then the queued listeners fire, reading their source's value at
//!    call time. Writes performed by evaluators or listeners during this
//!    phase are buffered again and seed a further round; the commit loop
//!    runs until a round produces no work.
//!
//! Nesting is flat: an `atomically` inside an `atomically` joins the outer
//! transaction instead of committing on its own.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use super::identity::CellId;
use super::strategy::{
    AccessStrategy, DefaultStrategy, DependentHandle, ErasedValue, IndependentHandle, StrategyGuard,
};
use super::subscribable::SubscriptionRecord;

thread_local! {
    static IN_TRANSACTION: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside an `atomically` block.
pub fn in_transaction() -> bool {
    IN_TRANSACTION.with(|flag| flag.get())
}

/// Run `body` as a transaction: buffer its writes, then commit and publish.
///
/// Returns whatever the body returns. If the body is already running inside
/// a transaction on this thread, the writes simply join the outer
/// transaction and commit when it does.
pub fn atomically<R>(body: impl FnOnce() -> R) -> R {
    if in_transaction() {
        return body();
    }

    let state = Rc::new(AtomicState::new());
    let guard = TransactionGuard::begin(Rc::new(AtomicStrategy {
        state: Rc::clone(&state),
    }));
    let result = body();
    state.commit();
    drop(guard);
    result
}

/// Keeps the transaction flag and strategy installed for the block's
/// lifetime, including unwinds out of the body.
struct TransactionGuard {
    _strategy: StrategyGuard,
}

impl TransactionGuard {
    fn begin(strategy: Rc<dyn AccessStrategy>) -> Self {
        IN_TRANSACTION.with(|flag| flag.set(true));
        Self {
            _strategy: StrategyGuard::install(strategy),
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        IN_TRANSACTION.with(|flag| flag.set(false));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Write,
    Publish,
}

struct PendingWrite {
    cell: Arc<dyn IndependentHandle>,
    value: ErasedValue,
}

/// An autonomous listener queued for the end of the current round.
struct QueuedListener {
    callback_key: usize,
    source: CellId,
    invoke: Arc<dyn Fn() + Send + Sync>,
}

struct AtomicState {
    phase: Cell<Phase>,
    /// Buffered writes, first-write order, last-write-wins per cell.
    pending: RefCell<IndexMap<CellId, PendingWrite>>,
    /// Forced notifications (`notify_changed`) queued during the write phase.
    broadcasts: RefCell<Vec<Arc<dyn IndependentHandle>>>,
    /// Dependents queued for re-evaluation this round, in discovery order.
    downstream: RefCell<IndexMap<CellId, Arc<dyn DependentHandle>>>,
    /// Autonomous listeners queued this round, deduplicated by
    /// (callback, source) so one listener on one cell fires once.
    listeners: RefCell<Vec<QueuedListener>>,
    /// Dependents already evaluated this round.
    evaluated: RefCell<HashSet<CellId>>,
}

impl AtomicState {
    fn new() -> Self {
        Self {
            phase: Cell::new(Phase::Write),
            pending: RefCell::new(IndexMap::new()),
            broadcasts: RefCell::new(Vec::new()),
            downstream: RefCell::new(IndexMap::new()),
            listeners: RefCell::new(Vec::new()),
            evaluated: RefCell::new(HashSet::new()),
        }
    }

    fn commit(&self) {
        let mut round = 0_u32;
        loop {
            let pending: Vec<PendingWrite> = {
                let mut map = self.pending.borrow_mut();
                map.drain(..).map(|(_, write)| write).collect()
            };
            let broadcasts: Vec<Arc<dyn IndependentHandle>> = self.broadcasts.borrow_mut().drain(..).collect();

            if pending.is_empty() && broadcasts.is_empty() {
                break;
            }
            round += 1;
            tracing::debug!(round, writes = pending.len(), broadcasts = broadcasts.len(), "committing round");

            self.downstream.borrow_mut().clear();
            self.listeners.borrow_mut().clear();
            self.evaluated.borrow_mut().clear();

            for write in pending {
                let current = write.cell.load();
                if write.cell.unchanged(&current, &write.value) {
                    continue;
                }
                write.cell.store(write.value);
                self.intercept_publication(write.cell.subscription_records());
            }
            for cell in broadcasts {
                self.intercept_publication(cell.subscription_records());
            }

            self.phase.set(Phase::Publish);

            // Evaluate each queued dependent once. A dependent read during
            // another dependent's evaluation may already have been forced, so
            // check the evaluated set again per entry.
            let queue: Vec<(CellId, Arc<dyn DependentHandle>)> = {
                let downstream = self.downstream.borrow();
                downstream.iter().map(|(id, cell)| (*id, Arc::clone(cell))).collect()
            };
            for (id, cell) in queue {
                let first_visit = self.evaluated.borrow_mut().insert(id);
                if first_visit {
                    cell.evaluate();
                }
            }

            let listeners: Vec<QueuedListener> = self.listeners.borrow_mut().drain(..).collect();
            for listener in listeners {
                (listener.invoke)();
            }

            self.phase.set(Phase::Write);
        }
    }

    /// Walk a cell's subscribers instead of notifying them. Tracked
    /// subscriptions queue their owning dependent (and, recursively, the
    /// dependent's own subscribers); autonomous ones queue a deferred call.
    fn intercept_publication(&self, records: Vec<SubscriptionRecord>) {
        for record in records {
            match record.tracked {
                None => {
                    let mut listeners = self.listeners.borrow_mut();
                    let already_queued = listeners
                        .iter()
                        .any(|l| l.callback_key == record.callback_key && l.source == record.source);
                    if !already_queued {
                        listeners.push(QueuedListener {
                            callback_key: record.callback_key,
                            source: record.source,
                            invoke: record.invoke,
                        });
                    }
                }
                Some(weak) => {
                    let Some(owner) = weak.upgrade() else {
                        tracing::warn!(source = ?record.source, "tracked subscriber dropped mid-transaction");
                        continue;
                    };
                    let id = owner.id();
                    let newly_queued = {
                        let mut downstream = self.downstream.borrow_mut();
                        if downstream.contains_key(&id) {
                            false
                        } else {
                            downstream.insert(id, Arc::clone(&owner));
                            true
                        }
                    };
                    if newly_queued {
                        self.intercept_publication(owner.subscription_records());
                    }
                }
            }
        }
    }
}

struct AtomicStrategy {
    state: Rc<AtomicState>,
}

impl AccessStrategy for AtomicStrategy {
    fn independent_read(&self, cell: &Arc<dyn IndependentHandle>) -> ErasedValue {
        let buffered = {
            let pending = self.state.pending.borrow();
            pending.get(&cell.id()).map(|write| Arc::clone(&write.value))
        };
        match buffered {
            Some(value) => value,
            None => cell.load(),
        }
    }

    fn independent_write(&self, cell: &Arc<dyn IndependentHandle>, new_value: ErasedValue) {
        let current = self.independent_read(cell);
        if cell.unchanged(&current, &new_value) {
            return;
        }
        self.state.pending.borrow_mut().insert(
            cell.id(),
            PendingWrite {
                cell: Arc::clone(cell),
                value: new_value,
            },
        );
    }

    fn dependent_read(&self, cell: &Arc<dyn DependentHandle>) {
        if self.state.phase.get() == Phase::Publish {
            let id = cell.id();
            let queued = self.state.downstream.borrow().contains_key(&id);
            if queued {
                let first_visit = self.state.evaluated.borrow_mut().insert(id);
                if first_visit {
                    cell.evaluate();
                }
                return;
            }
        }
        DefaultStrategy.dependent_read(cell);
    }

    fn mutation_broadcast(&self, cell: &Arc<dyn IndependentHandle>) {
        self.state.broadcasts.borrow_mut().push(Arc::clone(cell));
    }

    fn reevaluation_broadcast(&self, _notify: &dyn Fn()) {
        // Dependents re-evaluated mid-transaction publish through the commit
        // walk, never directly.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;

    #[test]
    fn flag_reflects_transaction_scope() {
        assert!(!in_transaction());
        atomically(|| {
            assert!(in_transaction());
        });
        assert!(!in_transaction());
    }

    #[test]
    fn empty_transaction_is_a_no_op() {
        let result = atomically(|| 42);
        assert_eq!(result, 42);
    }

    #[test]
    fn nested_transactions_share_the_outer_scope() {
        let cell = Observable::new(0);
        atomically(|| {
            cell.set(1);
            atomically(|| {
                // Inner block sees the outer block's buffered write.
                assert_eq!(cell.get(), 1);
                cell.set(2);
            });
            // Inner block did not commit on its own.
            assert_eq!(cell.get_untracked(), 0);
            assert_eq!(cell.get(), 2);
        });
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let cell = Observable::new(0);
        atomically(|| {
            cell.set(10);
            assert_eq!(cell.get(), 10);
            assert_eq!(cell.get_untracked(), 0);
        });
        assert_eq!(cell.get(), 10);
    }
}
