//! Cell identity.
//!
//! Every reactive cell, evaluator callback, and subscription is tagged with a
//! `CellId` drawn from one process-wide counter. Ids are the keys of every
//! associative map in the transaction engine, which is what makes "has this
//! cell already been queued/evaluated this round" an O(1) question.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a reactive cell or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Allocate a new unique id.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
