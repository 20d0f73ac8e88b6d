//! Dependency detection.
//!
//! The context tracks which computed cell is currently evaluating. Every cell
//! read consults it: if an evaluation is in flight, the cell registers itself
//! against the innermost frame, and the evaluating cell subscribes to exactly
//! the set of cells it read once its evaluator returns. Dependencies are
//! discovered, never declared, so a cell's dependency set can change between
//! evaluations (conditional reads).
//!
//! # Implementation
//!
//! A thread-local stack of evaluation frames. Entering an evaluation pushes a
//! frame; reads register against the top frame only; finishing pops the frame
//! and hands the collected sources back to the evaluating cell. The stack
//! shape supports nested evaluations (a computed cell that reads another
//! computed cell) and the guard keeps the stack consistent if an evaluator
//! panics.

use std::cell::RefCell;
use std::sync::Arc;

use super::identity::CellId;
use super::subscribable::Subscription;
use super::strategy::DependentHandle;

/// A cell that can be subscribed to as a discovered dependency.
pub(crate) trait TrackSource: Send + Sync {
    fn id(&self) -> CellId;

    /// Subscribe `owner` to this cell with a tracked subscription whose
    /// callback re-evaluates the owner.
    fn subscribe_tracked(&self, owner: &Arc<dyn DependentHandle>) -> Subscription;
}

struct Frame {
    owner: CellId,
    /// Sources read during this evaluation, in first-read order, one entry
    /// per cell.
    sources: Vec<Arc<dyn TrackSource>>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Register a cell read against the current evaluation, if one is active.
///
/// No-op outside an evaluation, for repeated reads of the same cell, and for
/// a cell reading itself.
pub(crate) fn register_dependency(source: Arc<dyn TrackSource>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let id = source.id();
        if id == frame.owner {
            return;
        }
        if frame.sources.iter().any(|existing| existing.id() == id) {
            return;
        }
        frame.sources.push(source);
    });
}

/// True when some computed cell is currently evaluating on this thread.
#[allow(dead_code)]
pub(crate) fn is_tracking() -> bool {
    FRAMES.with(|frames| !frames.borrow().is_empty())
}

/// Guard for one evaluation frame.
///
/// Pops the frame when dropped, so a panicking evaluator cannot leave a stale
/// frame behind.
pub(crate) struct EvaluationScope {
    owner: CellId,
    finished: bool,
}

impl EvaluationScope {
    pub(crate) fn enter(owner: CellId) -> Self {
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                owner,
                sources: Vec::new(),
            });
        });
        Self {
            owner,
            finished: false,
        }
    }

    /// End the evaluation and take the sources it read.
    pub(crate) fn finish(mut self) -> Vec<Arc<dyn TrackSource>> {
        self.finished = true;
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            match popped {
                Some(frame) => {
                    debug_assert_eq!(
                        frame.owner, self.owner,
                        "evaluation frame mismatch: expected {:?}, got {:?}",
                        self.owner, frame.owner
                    );
                    frame.sources
                }
                None => Vec::new(),
            }
        })
    }
}

impl Drop for EvaluationScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Unwinding out of an evaluator: discard the frame.
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}
