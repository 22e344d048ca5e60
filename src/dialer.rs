//! The dialing seam between the pool and the underlying transport
//!
//! The pool consumes transports through [`Dialer`]: an async connection
//! factory plus a synchronous liveness probe for idle candidates. The
//! bundled [`TcpDialer`] covers plain TCP with tuned sockets and a
//! non-blocking peek check.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::debug;

use crate::connection::Poolable;
use crate::constants::socket::{CONNECT_TIMEOUT, PEEK_BUFFER_SIZE, RECV_BUFFER, SEND_BUFFER};

/// Connection factory and liveness probe for one logical target
///
/// `dial` must be safe to call concurrently from multiple tasks. `check` is
/// invoked synchronously on an idle candidate before it is handed to a
/// caller; an error means "discard it and try the next one". The default
/// check accepts everything, which is the behavior of a pool with no health
/// check configured.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connection handle type produced by this dialer
    type Connection: Poolable;

    /// Open a fresh connection
    async fn dial(&self) -> Result<Self::Connection>;

    /// Probe an idle connection for liveness
    ///
    /// Must not block; it runs inside the pool's critical section.
    fn check(&self, conn: &mut Self::Connection) -> Result<()> {
        let _ = conn;
        Ok(())
    }
}

/// TCP dialer with tuned sockets and a non-blocking liveness peek
#[derive(Debug, Clone)]
pub struct TcpDialer {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer for `host:port` with the default connect timeout
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Target hostname or IP address
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Target port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        let resolved: Vec<SocketAddr> = lookup_host(&addr)
            .await
            .with_context(|| format!("failed to resolve {addr}"))?
            .collect();
        let target = *resolved
            .first()
            .with_context(|| format!("no addresses found for {addr}"))?;

        let socket = if target.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_recv_buffer_size(RECV_BUFFER as u32)?;
        socket.set_send_buffer_size(SEND_BUFFER as u32)?;

        let stream = tokio::time::timeout(self.connect_timeout, socket.connect(target))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "connect to {addr} timed out after {:?}",
                    self.connect_timeout
                )
            })?
            .with_context(|| format!("failed to connect to {addr}"))?;

        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Connection = TcpStream;

    async fn dial(&self) -> Result<TcpStream> {
        debug!(host = %self.host, port = self.port, "dialing");
        self.connect().await
    }

    /// Non-blocking one-byte peek
    ///
    /// `WouldBlock` is the healthy idle case: nothing to read between
    /// sessions. EOF, readable data and any other error all disqualify the
    /// connection.
    fn check(&self, conn: &mut TcpStream) -> Result<()> {
        let mut peek_buf = [0u8; PEEK_BUFFER_SIZE];
        match conn.try_read(&mut peek_buf) {
            Ok(0) => anyhow::bail!("connection closed by remote"),
            Ok(_) => anyhow::bail!("unexpected data on idle connection"),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(anyhow::anyhow!("connection error: {e}")),
        }
    }
}
