//! The pooled connection contract
//!
//! Anything owned and sendable can live in the pool; closing a connection
//! is dropping it. Transports with keep-alive semantics opt in through
//! [`Poolable::apply_keepalive`], which the pool invokes once for every
//! freshly dialed connection regardless of which path produced it.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Contract for connection handles managed by a [`Pool`](crate::Pool)
///
/// Ownership is the whole contract: the pool owns buffered handles
/// exclusively, the caller owns acquired ones, and dropping a handle closes
/// it.
pub trait Poolable: Send + 'static {
    /// Enable transport keep-alive probes at `period`, when supported
    ///
    /// The default is a no-op for transports without keep-alive semantics.
    fn apply_keepalive(&self, period: Duration) -> io::Result<()> {
        let _ = period;
        Ok(())
    }
}

impl Poolable for TcpStream {
    /// Enable TCP keep-alive, probing after `period` idle and at `period`
    /// intervals thereafter
    fn apply_keepalive(&self, period: Duration) -> io::Result<()> {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(period)
            .with_interval(period);
        let sock = socket2::SockRef::from(self);
        sock.set_keepalive(true)?;
        sock.set_tcp_keepalive(&keepalive)
    }
}
