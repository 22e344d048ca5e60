//! The connection pool
//!
//! A [`Pool`] owns a bounded FIFO of idle connections, keeps it filled
//! toward `max_idle` through a throttled background populator, falls back
//! to on-demand dialing on a buffer miss, retires idle entries by age and
//! health check, and supports an exclusive drain-and-reconfigure
//! [`restart`](Pool::restart) while acquire/release traffic is in flight.
//!
//! All scalar state lives behind one short-critical-section mutex; the
//! buffer itself is a lock-free bounded queue, so [`get`](Pool::get) and
//! [`put`](Pool::put) only ever block briefly on the scalar lock. Dialing
//! always happens outside the lock on a snapshot of the settings, so one
//! slow dial cannot stall the rest of the traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::connection::Poolable;
use crate::constants::pool::{DIAL_TICK, IDLE_BUFFER_FACTOR, KEEPALIVE_PERIOD};
use crate::dialer::Dialer;
use crate::error::PoolError;

/// An idle connection and the moment it entered the buffer
struct IdleEntry<C> {
    conn: C,
    parked_at: Instant,
}

impl<C> IdleEntry<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            parked_at: Instant::now(),
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.parked_at.elapsed() > ttl
    }
}

type IdleBuffer<C> = Arc<ArrayQueue<IdleEntry<C>>>;

/// Scalar pool state; every mutation happens under the [`Shared`] mutex
struct State<D: Dialer> {
    config: PoolConfig,
    dialer: Arc<D>,
    released: bool,
    /// Connections the pool believes it owns (idle only; checked-out
    /// handles are untracked)
    tracked: usize,
    /// `None` before the first start, after release, and when
    /// `max_idle == 0`; in all three cases every put is refused and every
    /// get dials
    idle: Option<IdleBuffer<D::Connection>>,
}

struct Shared<D: Dialer> {
    name: String,
    state: Mutex<State<D>>,
    /// Claimed by the running populator instance, if any
    populating: AtomicBool,
}

/// Outcome of one background dial-and-insert attempt
enum DialOutcome {
    Established,
    Failed,
    Refused,
}

/// Replacement settings applied atomically during [`Pool::restart`]
///
/// Config and dialer travel together so an in-flight acquisition can never
/// observe the new dial target with the old health check, or vice versa.
pub struct PoolUpdate<D: Dialer> {
    pub config: PoolConfig,
    pub dialer: Arc<D>,
}

/// Point-in-time pool counters for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Entries currently sitting in the idle buffer
    pub idle: usize,
    /// Connections the pool currently believes it owns
    pub tracked: usize,
    /// Configured capacity ceiling
    pub max_idle: usize,
    /// Whether the pool is terminal
    pub released: bool,
}

/// Managed pool of pre-established connections for one logical target
///
/// Cloning is cheap; every clone operates on the same pool.
pub struct Pool<D: Dialer> {
    shared: Arc<Shared<D>>,
}

impl<D: Dialer> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Dialer> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for constructing [`Pool`] instances
///
/// # Examples
///
/// ```no_run
/// use idlepool::{Pool, TcpDialer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pool = Pool::builder(Arc::new(TcpDialer::new("10.0.0.7", 4222)))
///     .name("backend")
///     .max_idle(8)
///     .min_idle(2)
///     .dial_rate(4)
///     .idle_ttl(Duration::from_secs(60))
///     .build();
/// ```
pub struct Builder<D: Dialer> {
    dialer: Arc<D>,
    name: Option<String>,
    config: PoolConfig,
}

impl<D: Dialer> Builder<D> {
    fn new(dialer: Arc<D>) -> Self {
        Self {
            dialer,
            name: None,
            config: PoolConfig::default(),
        }
    }

    /// Set a friendly name for log output (defaults to "pool")
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the capacity ceiling for stored idle connections
    #[must_use]
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.config.max_idle = max_idle;
        self
    }

    /// Set the low-water mark that re-triggers population
    #[must_use]
    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.config.min_idle = min_idle;
        self
    }

    /// Set the population throttle in connections per second (0 = unthrottled)
    #[must_use]
    pub fn dial_rate(mut self, dial_rate: usize) -> Self {
        self.config.dial_rate = dial_rate;
        self
    }

    /// Set the maximum idle age before a connection is discarded
    #[must_use]
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.config.idle_ttl = Some(ttl);
        self
    }

    /// Replace the whole configuration at once
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pool; call [`Pool::start`] to begin population
    #[must_use]
    pub fn build(self) -> Pool<D> {
        let name = self.name.unwrap_or_else(|| "pool".to_string());
        Pool::named(name, self.config, self.dialer)
    }
}

impl<D: Dialer> Pool<D> {
    /// Create an unstarted pool with the given settings
    #[must_use]
    pub fn new(config: PoolConfig, dialer: Arc<D>) -> Self {
        Self::named("pool", config, dialer)
    }

    /// Create an unstarted pool with a name used in log output
    #[must_use]
    pub fn named(name: impl Into<String>, config: PoolConfig, dialer: Arc<D>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    config,
                    dialer,
                    released: false,
                    tracked: 0,
                    idle: None,
                }),
                populating: AtomicBool::new(false),
            }),
        }
    }

    /// Create a builder for fluent construction
    #[must_use]
    pub fn builder(dialer: Arc<D>) -> Builder<D> {
        Builder::new(dialer)
    }

    /// Name used in log output
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        // Poisoning carries no extra meaning here; every critical section
        // leaves the state consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Activate the pool and launch background population
    ///
    /// Clears the terminal flag and allocates the idle buffer at
    /// `2 * max_idle` capacity. A pool with `max_idle == 0` keeps no idle
    /// buffer and dials on every acquisition. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) {
        let mut state = self.lock();
        self.start_locked(&mut state);
    }

    fn start_locked(&self, state: &mut State<D>) {
        state.released = false;
        state.config.warn_on_suspect();
        if state.config.max_idle > 0 {
            state.idle = Some(Arc::new(ArrayQueue::new(
                state.config.max_idle * IDLE_BUFFER_FACTOR,
            )));
            debug!(
                pool = %self.shared.name,
                max_idle = state.config.max_idle,
                min_idle = state.config.min_idle,
                dial_rate = state.config.dial_rate,
                "starting pool"
            );
            self.trigger_populate();
        } else {
            state.idle = None;
            debug!(pool = %self.shared.name, "starting pool without idle storage");
        }
    }

    /// Drain and close every idle connection and mark the pool terminal
    ///
    /// Subsequent [`get`](Self::get) calls fail with
    /// [`PoolError::Released`] and subsequent [`put`](Self::put) calls are
    /// rejected. Calling this on an already-released pool is a no-op.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        let drained = Self::drain_locked(&mut state);
        state.released = true;
        debug!(pool = %self.shared.name, drained, "pool released");
    }

    /// Drain the pool and start it again, optionally replacing its settings
    ///
    /// The drain, the swap and the relaunch happen inside one critical
    /// section, so concurrent [`get`](Self::get)/[`put`](Self::put) traffic
    /// observes either the old settings or the new ones, never a torn mix.
    /// This is the only supported way to change the configuration or the
    /// dialer of a live pool. Dial and check calls snapshotted before the
    /// swap may still complete against the old settings.
    pub fn restart(&self, update: Option<PoolUpdate<D>>) {
        let mut state = self.lock();
        let drained = Self::drain_locked(&mut state);
        if let Some(update) = update {
            state.config = update.config;
            state.dialer = update.dialer;
        }
        info!(pool = %self.shared.name, drained, "restarting pool");
        self.start_locked(&mut state);
    }

    fn drain_locked(state: &mut State<D>) -> usize {
        let mut drained = 0;
        if let Some(idle) = state.idle.take() {
            while let Some(entry) = idle.pop() {
                state.tracked = state.tracked.saturating_sub(1);
                drop(entry);
                drained += 1;
            }
        }
        drained
    }

    /// Acquire a connection: a buffered idle one when available, a fresh
    /// dial otherwise
    ///
    /// Idle candidates past the configured TTL, and candidates rejected by
    /// the dialer's health check, are closed and the next entry is tried.
    /// On a buffer miss the currently configured dialer is invoked and its
    /// error surfaced verbatim; this call never waits for the populator.
    pub async fn get(&self) -> Result<D::Connection, PoolError> {
        let dialer = {
            let mut state = self.lock();
            if state.released {
                return Err(PoolError::Released);
            }
            while let Some(mut entry) = state.idle.as_ref().and_then(|idle| idle.pop()) {
                state.tracked = state.tracked.saturating_sub(1);
                if state.tracked <= state.config.min_idle {
                    self.trigger_populate();
                }
                if let Some(ttl) = state.config.idle_ttl {
                    if entry.expired(ttl) {
                        debug!(pool = %self.shared.name, "discarding idle connection past its TTL");
                        continue;
                    }
                }
                if let Err(error) = state.dialer.check(&mut entry.conn) {
                    debug!(
                        pool = %self.shared.name,
                        %error,
                        "discarding idle connection that failed its health check"
                    );
                    continue;
                }
                return Ok(entry.conn);
            }
            Arc::clone(&state.dialer)
        };

        // Buffer miss: dial on demand, outside the lock.
        let conn = dialer.dial().await.map_err(PoolError::Dial)?;
        self.tune_fresh(&conn);
        Ok(conn)
    }

    /// Acquire with a deadline
    ///
    /// The buffered path never blocks; the deadline bounds the on-demand
    /// dial taken on a buffer miss.
    pub async fn timeout_get(&self, wait: Duration) -> Result<D::Connection, PoolError> {
        match tokio::time::timeout(wait, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(wait)),
        }
    }

    /// Return a connection to the idle buffer
    ///
    /// On success the pool takes ownership. A terminal pool and a full (or
    /// absent) buffer both reject the connection and hand it straight back
    /// in the `Err` arm; what to do with it then is the caller's decision.
    pub fn put(&self, conn: D::Connection) -> Result<(), D::Connection> {
        let mut state = self.lock();
        if state.released {
            return Err(conn);
        }
        let pushed = match state.idle.as_ref() {
            Some(idle) => idle.push(IdleEntry::new(conn)).map_err(|entry| entry.conn),
            None => Err(conn),
        };
        match pushed {
            Ok(()) => {
                state.tracked += 1;
                Ok(())
            }
            Err(conn) => Err(conn),
        }
    }

    /// Current pool counters
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            idle: state.idle.as_ref().map_or(0, |idle| idle.len()),
            tracked: state.tracked,
            max_idle: state.config.max_idle,
            released: state.released,
        }
    }

    /// Launch the populator unless an instance is already running
    fn trigger_populate(&self) {
        if self
            .shared
            .populating
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let pool = self.clone();
            tokio::spawn(async move {
                pool.populate().await;
                pool.shared.populating.store(false, Ordering::Release);
            });
        }
    }

    /// Fill the idle buffer toward `max_idle`, honoring the dial rate
    ///
    /// Works from a snapshot taken under the lock, then dials without it.
    /// A failed dial skips the attempt and the loop keeps going, so a
    /// persistently broken dialer leaves the pool starved rather than
    /// surfacing an error. Exits when the deficit is closed or an insert is
    /// refused.
    async fn populate(&self) {
        let (dial_rate, mut established, max_idle, dialer) = {
            let state = self.lock();
            if state.released {
                return;
            }
            (
                state.config.dial_rate,
                state.tracked,
                state.config.max_idle,
                Arc::clone(&state.dialer),
            )
        };

        debug!(pool = %self.shared.name, established, max_idle, "populating pool");

        if dial_rate > 0 {
            'filling: while established < max_idle {
                let batch = dial_rate.min(max_idle - established);
                for _ in 0..batch {
                    match self.dial_into_pool(&dialer).await {
                        DialOutcome::Established => established += 1,
                        DialOutcome::Failed => {}
                        DialOutcome::Refused => break 'filling,
                    }
                }
                tokio::time::sleep(DIAL_TICK).await;
            }
        } else {
            while established < max_idle {
                match self.dial_into_pool(&dialer).await {
                    DialOutcome::Established => established += 1,
                    DialOutcome::Failed => {}
                    DialOutcome::Refused => break,
                }
            }
        }

        debug!(pool = %self.shared.name, established, "populator finished");
    }

    async fn dial_into_pool(&self, dialer: &Arc<D>) -> DialOutcome {
        match dialer.dial().await {
            Ok(conn) => {
                self.tune_fresh(&conn);
                if self.put(conn).is_ok() {
                    DialOutcome::Established
                } else {
                    debug!(pool = %self.shared.name, "populator insert refused");
                    DialOutcome::Refused
                }
            }
            Err(error) => {
                debug!(pool = %self.shared.name, %error, "background dial failed");
                DialOutcome::Failed
            }
        }
    }

    /// Keep-alive setup applied to every freshly dialed connection,
    /// whichever path produced it
    fn tune_fresh(&self, conn: &D::Connection) {
        if let Err(error) = conn.apply_keepalive(KEEPALIVE_PERIOD) {
            debug!(pool = %self.shared.name, %error, "failed to enable keep-alive");
        }
    }
}
