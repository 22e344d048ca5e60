//! Managed pool of pre-established network connections
//!
//! `idlepool` amortizes connection-setup latency for clients that issue
//! many short-lived outbound sessions. A [`Pool`] keeps a bounded FIFO
//! buffer of idle connections, fills it in the background at a
//! configurable rate, falls back to dialing on demand when the buffer is
//! empty, retires entries by idle age or health check, and supports an
//! atomic drain-and-reconfigure [`restart`](Pool::restart) while
//! concurrent acquire/release traffic is in flight.
//!
//! The underlying transport is consumed through the [`Dialer`] seam; the
//! bundled [`TcpDialer`] covers plain TCP with tuned sockets and a
//! non-blocking liveness peek. Any owned connection type can be pooled by
//! implementing [`Poolable`]; closing a connection is dropping it.
//!
//! This is not a generic object pool and not a load balancer: it manages
//! raw connection handles for one logical target and does no framing,
//! request retrying or multiplexing.
//!
//! # Examples
//!
//! ```no_run
//! use idlepool::{Pool, TcpDialer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Pool::builder(Arc::new(TcpDialer::new("10.0.0.7", 4222)))
//!         .name("backend")
//!         .max_idle(8)
//!         .min_idle(2)
//!         .dial_rate(4)
//!         .idle_ttl(Duration::from_secs(60))
//!         .build();
//!     pool.start();
//!
//!     let conn = pool.get().await?;
//!     // ... run a session over the connection ...
//!     if let Err(conn) = pool.put(conn) {
//!         // Buffer full: the handle is back in the caller's hands.
//!         drop(conn);
//!     }
//!
//!     pool.release();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod dialer;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use connection::Poolable;
pub use dialer::{Dialer, TcpDialer};
pub use error::PoolError;
pub use pool::{Builder, Pool, PoolStatus, PoolUpdate};
