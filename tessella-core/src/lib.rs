//! Tessella Core
//!
//! This crate provides a reactive state engine built on observable cells:
//!
//! - Observable cells (mutable state with change notification)
//! - Computed cells (derived values with automatic dependency detection)
//! - Subscriptions (autonomous change listeners)
//! - Transactions (batched writes with at-most-once re-evaluation)
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: observable and computed cells, dependency tracking, and
//!   the `atomically` transaction engine
//! - `error`: the error taxonomy for the cell API
//!
//! # Example
//!
//! ```rust,ignore
//! use tessella_core::{atomically, Computed, Observable};
//!
//! let width = Observable::new(2);
//! let height = Observable::new(3);
//!
//! let w = width.clone();
//! let h = height.clone();
//! let area = Computed::new(move || w.get() * h.get());
//! assert_eq!(area.get(), 6);
//!
//! // Both writes land before `area` re-evaluates, exactly once.
//! atomically(|| {
//!     width.set(10);
//!     height.set(20);
//! });
//! assert_eq!(area.get(), 200);
//! ```

pub mod error;
pub mod reactive;

pub use error::ReactiveError;
pub use reactive::{atomically, in_transaction, CellId, Computed, Observable, Subscription};
