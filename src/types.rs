//! Error types shared across the engine
//!
//! Discovery queries surface errors to their caller; score refresh never
//! propagates into a content-serving request (failures are logged by the
//! detached task that owns them). Cache degradation is not an error at all,
//! only a logged condition.

use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for ranking and discovery operations
#[derive(Debug, Error)]
pub enum PulseError {
    /// Referenced entity does not exist. Not retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input (coordinates, radius, paging). Rejected before any I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Store or cache backend failed. Transient: safe to retry on a later
    /// tick, never retried inline.
    #[error("Store error: {0}")]
    Store(String),

    /// A per-entity operation exceeded its deadline. Treated the same as a
    /// transient store failure by the sweep.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PulseError>;
