//! Reactive Primitives
//!
//! This module implements the core reactive system: observable cells,
//! computed cells, subscriptions, and transactional batching.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable is a container for mutable state. When an observable's
//! value is read during a computed cell's evaluation, the observable
//! automatically registers itself as a dependency of that cell. When the
//! observable's value changes, dependents re-evaluate and autonomous
//! listeners are notified. An equality comparer gates writes, so setting a
//! cell to a value it already holds publishes nothing.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. Its dependencies
//! are discovered by observation and rebuilt from scratch on every
//! evaluation, so conditional reads change the dependency set. A computed
//! can optionally carry a writer, letting writes flow back to its sources.
//!
//! ## Transactions
//!
//! `atomically` batches writes: inside the block nothing publishes, and at
//! commit each affected dependent re-evaluates at most once per round while
//! each autonomous listener fires at most once per source, always seeing
//! post-commit values.
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local stack of evaluation frames.
//! When a cell is read, we check for an active frame and, if present,
//! register the read with it.
//!
//! All cell access is routed through an accessor strategy, also held in a
//! thread-local stack. The default strategy passes reads and writes through
//! immediately; `atomically` swaps in a strategy that buffers writes and
//! intercepts publication. Cells themselves never know whether they are
//! inside a transaction.

mod computed;
mod context;
mod identity;
mod observable;
mod strategy;
mod subscribable;
mod transaction;

pub use computed::Computed;
pub use identity::CellId;
pub use observable::Observable;
pub use subscribable::Subscription;
pub use transaction::{atomically, in_transaction};
