//! Error types.

use thiserror::Error;

/// Errors surfaced by the reactive cell API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A write was attempted on a computed cell constructed without a writer.
    #[error("cannot write to a computed cell constructed without a writer")]
    ReadOnlyComputed,
}
