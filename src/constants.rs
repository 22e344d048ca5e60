//! Constants used throughout the pool
//!
//! This module centralizes magic numbers and tuning values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Connection pool constants
pub mod pool {
    use super::Duration;

    /// Default capacity ceiling for stored idle connections
    pub const DEFAULT_MAX_IDLE: usize = 10;

    /// Default low-water mark that re-triggers population
    pub const DEFAULT_MIN_IDLE: usize = 2;

    /// Idle buffer capacity factor
    ///
    /// The buffer holds up to `IDLE_BUFFER_FACTOR * max_idle` entries so a
    /// burst of returns does not immediately hit backpressure.
    pub const IDLE_BUFFER_FACTOR: usize = 2;

    /// TCP keep-alive probe period applied to every freshly dialed
    /// connection, whichever path produced it
    pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(15);

    /// Pause between populator batches when a dial rate is configured
    pub const DIAL_TICK: Duration = Duration::from_secs(1);

    /// Suggested deadline for [`timeout_get`](crate::Pool::timeout_get)
    /// callers that do not want to pick their own
    pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Socket tuning constants for the bundled TCP dialer
pub mod socket {
    use super::Duration;

    /// TCP receive buffer size for pooled connections (1MB)
    pub const RECV_BUFFER: usize = 1024 * 1024;

    /// TCP send buffer size for pooled connections (1MB)
    pub const SEND_BUFFER: usize = 1024 * 1024;

    /// Default timeout for establishing a TCP connection
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Peek buffer size for the liveness check
    ///
    /// One byte is enough to distinguish closed, chattering and idle
    /// connections.
    pub const PEEK_BUFFER_SIZE: usize = 1;
}
