//! Error types for pool acquisition
//!
//! Only the synchronous acquisition path surfaces errors to callers.
//! Background dial and health-check failures are logged and absorbed;
//! population is best-effort by design.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`Pool::get`](crate::Pool::get) and
/// [`Pool::timeout_get`](crate::Pool::timeout_get)
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool has been released and accepts no further acquisitions
    #[error("pool is released")]
    Released,

    /// On-demand dialing failed; carries the dialer's error verbatim
    #[error("dial failed: {0}")]
    Dial(anyhow::Error),

    /// Acquisition did not produce a connection within the deadline
    #[error("no connection within {0:?}")]
    Timeout(Duration),
}

impl PoolError {
    /// Check whether this error came from the terminal-pool path
    #[must_use]
    pub const fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }

    /// Check whether this error wraps a dial failure
    #[must_use]
    pub const fn is_dial_failure(&self) -> bool {
        matches!(self, Self::Dial(_))
    }
}
