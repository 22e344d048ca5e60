//! Pool lifecycle and acquisition behavior over an instrumented in-memory
//! dialer
//!
//! Covers FIFO reuse, the no-idle-storage degradation, terminal-state
//! rejection, TTL and health-check eviction, capacity backpressure,
//! background population at both throttle settings, deadline-bearing
//! acquisition and hot restart under concurrent traffic.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use idlepool::{Dialer, Pool, PoolConfig, PoolError, PoolUpdate, Poolable};

/// Connection handle with a unique id and a shared close counter
#[derive(Debug)]
struct TestConn {
    id: usize,
    closed: Arc<AtomicUsize>,
}

impl Poolable for TestConn {}

impl Drop for TestConn {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory dialer with switchable failure modes and dial latency
struct TestDialer {
    next_id: AtomicUsize,
    dialed: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fail_dials: AtomicBool,
    fail_checks: AtomicBool,
    dial_delay_ms: AtomicU64,
}

impl TestDialer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicUsize::new(0),
            dialed: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            fail_dials: AtomicBool::new(false),
            fail_checks: AtomicBool::new(false),
            dial_delay_ms: AtomicU64::new(0),
        })
    }

    fn dial_count(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_fail_dials(&self, on: bool) {
        self.fail_dials.store(on, Ordering::SeqCst);
    }

    fn set_fail_checks(&self, on: bool) {
        self.fail_checks.store(on, Ordering::SeqCst);
    }

    fn set_dial_delay(&self, delay: Duration) {
        self.dial_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mint a connection without going through `dial`
    fn hand_made(&self, id: usize) -> TestConn {
        TestConn {
            id,
            closed: Arc::clone(&self.closed),
        }
    }
}

#[async_trait]
impl Dialer for TestDialer {
    type Connection = TestConn;

    async fn dial(&self) -> Result<TestConn> {
        let delay = self.dial_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_dials.load(Ordering::SeqCst) {
            anyhow::bail!("dialer switched off");
        }
        self.dialed.fetch_add(1, Ordering::SeqCst);
        Ok(TestConn {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            closed: Arc::clone(&self.closed),
        })
    }

    fn check(&self, _conn: &mut TestConn) -> Result<()> {
        if self.fail_checks.load(Ordering::SeqCst) {
            anyhow::bail!("probe rejected connection");
        }
        Ok(())
    }
}

fn config(max_idle: usize, min_idle: usize) -> PoolConfig {
    PoolConfig {
        max_idle,
        min_idle,
        dial_rate: 0,
        idle_ttl: None,
    }
}

/// Poll until `predicate` holds or roughly five seconds pass
async fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test]
async fn test_get_returns_most_recent_puts_in_fifo_order() {
    let dialer = TestDialer::new();
    // A failing, throttled dialer keeps the populator quiet so the buffer
    // holds exactly the connections parked by hand.
    dialer.set_fail_dials(true);
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(4)
        .min_idle(0)
        .dial_rate(1)
        .build();
    pool.start();

    for id in [100, 101, 102] {
        pool.put(dialer.hand_made(id)).expect("buffer has room");
    }

    for expected in [100, 101, 102] {
        let conn = pool.get().await.expect("buffered connection available");
        assert_eq!(conn.id, expected, "idle connections must come out FIFO");
    }
}

#[tokio::test]
async fn test_zero_max_idle_always_dials() {
    let dialer = TestDialer::new();
    let pool = Pool::new(config(0, 0), Arc::clone(&dialer));
    pool.start();

    let first = pool.get().await.unwrap();
    assert_eq!(dialer.dial_count(), 1);

    // The pool keeps no idle storage, so the return is refused...
    let rejected = pool.put(first);
    assert!(rejected.is_err(), "a pool without idle storage refuses puts");

    // ...and the next acquisition dials again.
    let _second = pool.get().await.unwrap();
    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(pool.status().tracked, 0);
}

#[tokio::test]
async fn test_release_drains_and_goes_terminal() {
    let dialer = TestDialer::new();
    dialer.set_fail_dials(true);
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(4)
        .min_idle(0)
        .dial_rate(1)
        .build();
    pool.start();

    pool.put(dialer.hand_made(0)).unwrap();
    pool.put(dialer.hand_made(1)).unwrap();
    assert_eq!(pool.status().tracked, 2);

    pool.release();

    assert_eq!(dialer.closed_count(), 2, "drained connections are closed");
    let status = pool.status();
    assert!(status.released);
    assert_eq!(status.tracked, 0);

    let err = pool.get().await.expect_err("terminal pool rejects get");
    assert!(matches!(err, PoolError::Released));
    assert!(pool.put(dialer.hand_made(2)).is_err());

    // Releasing again is a no-op.
    pool.release();
    assert_eq!(pool.status().tracked, 0);
}

#[tokio::test]
async fn test_expired_idle_connection_is_never_returned() {
    let dialer = TestDialer::new();
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(1)
        .min_idle(0)
        .idle_ttl(Duration::from_millis(50))
        .build();
    pool.start();

    assert!(
        wait_for(|| pool.status().idle == 1).await,
        "populator should park one connection"
    );

    // Let the parked connection go stale, then acquire: the stale entry is
    // closed and a replacement dialed instead.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let conn = pool.get().await.expect("replacement dial succeeds");
    assert_ne!(conn.id, 0, "the stale connection must not be handed out");
    assert!(dialer.closed_count() >= 1);
}

#[tokio::test]
async fn test_unhealthy_idle_connections_fall_through_to_dial() {
    let dialer = TestDialer::new();
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(2)
        .min_idle(0)
        .build();
    pool.start();

    assert!(wait_for(|| pool.status().idle == 2).await);

    dialer.set_fail_checks(true);
    let conn = pool.get().await.expect("fresh dial still succeeds");

    // Both buffered candidates (ids 0 and 1) failed their probe and were
    // closed; the returned connection came from the on-demand dial.
    assert!(conn.id >= 2);
    assert!(dialer.closed_count() >= 2);
}

#[tokio::test]
async fn test_put_beyond_capacity_hands_the_connection_back() {
    let dialer = TestDialer::new();
    dialer.set_fail_dials(true);
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(1)
        .min_idle(0)
        .dial_rate(1)
        .build();
    pool.start();

    // Capacity is 2 * max_idle.
    pool.put(dialer.hand_made(200)).unwrap();
    pool.put(dialer.hand_made(201)).unwrap();
    assert_eq!(pool.status().tracked, 2);

    let rejected = pool
        .put(dialer.hand_made(202))
        .expect_err("full buffer refuses the put");
    assert_eq!(rejected.id, 202, "the same handle comes back to the caller");
    assert_eq!(pool.status().tracked, 2, "a refused put never counts");
}

#[tokio::test]
async fn test_populator_fills_to_max_and_refills_after_drawdown() {
    let dialer = TestDialer::new();
    let pool = Pool::new(config(10, 2), Arc::clone(&dialer));
    pool.start();

    assert!(
        wait_for(|| pool.status().idle == 10).await,
        "unthrottled populator should reach max_idle"
    );
    assert_eq!(pool.status().tracked, 10);

    // Draw down to one idle connection; crossing the low-water mark must
    // re-trigger population back toward the ceiling.
    for _ in 0..9 {
        let conn = pool.get().await.unwrap();
        drop(conn);
    }

    assert!(
        wait_for(|| pool.status().idle == 10).await,
        "pool should self-heal back to max_idle"
    );
}

#[tokio::test]
async fn test_throttled_populator_paces_batches() {
    let dialer = TestDialer::new();
    let started = Instant::now();
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(4)
        .min_idle(0)
        .dial_rate(2)
        .build();
    pool.start();

    assert!(wait_for(|| pool.status().idle >= 2).await);
    let after_first_batch = dialer.dial_count();
    assert!(
        after_first_batch >= 2,
        "first batch should open dial_rate connections"
    );

    assert!(wait_for(|| pool.status().idle == 4).await);
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "closing the deficit takes at least one inter-batch pause"
    );
    assert_eq!(dialer.dial_count(), 4);
}

#[tokio::test]
async fn test_background_dial_failures_are_swallowed() {
    let dialer = TestDialer::new();
    dialer.set_fail_dials(true);
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(3)
        .min_idle(0)
        .dial_rate(1)
        .build();
    pool.start();

    // The populator keeps trying without ever surfacing an error; the pool
    // simply stays starved.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.status().idle, 0);

    // Acquisition-time errors do surface.
    let err = pool.get().await.expect_err("on-demand dial fails");
    assert!(matches!(err, PoolError::Dial(_)));
}

#[tokio::test]
async fn test_timeout_get_bounds_slow_dials() {
    let dialer = TestDialer::new();
    dialer.set_dial_delay(Duration::from_millis(200));
    // No idle storage: every acquisition takes the dial path.
    let pool = Pool::new(config(0, 0), Arc::clone(&dialer));
    pool.start();

    let err = pool
        .timeout_get(Duration::from_millis(20))
        .await
        .expect_err("deadline shorter than the dial");
    assert!(matches!(err, PoolError::Timeout(_)));

    let conn = pool.timeout_get(Duration::from_secs(2)).await;
    assert!(conn.is_ok(), "a generous deadline succeeds");
}

#[tokio::test]
async fn test_unstarted_pool_degrades_to_dialing() {
    let dialer = TestDialer::new();
    let pool = Pool::new(config(4, 1), Arc::clone(&dialer));

    // Never started: no buffer exists, so gets dial and puts are refused.
    let conn = pool.get().await.unwrap();
    assert_eq!(dialer.dial_count(), 1);
    assert!(pool.put(conn).is_err());
}

#[tokio::test]
async fn test_restart_swaps_dialer_and_config() {
    let old_dialer = TestDialer::new();
    let pool = Pool::builder(Arc::clone(&old_dialer))
        .name("swappable")
        .max_idle(2)
        .min_idle(0)
        .build();
    pool.start();
    assert!(wait_for(|| pool.status().idle == 2).await);

    let new_dialer = TestDialer::new();
    pool.restart(Some(PoolUpdate {
        config: config(3, 1),
        dialer: Arc::clone(&new_dialer),
    }));

    assert_eq!(
        old_dialer.closed_count(),
        2,
        "restart drains and closes the old connections"
    );
    assert!(
        wait_for(|| pool.status().idle == 3).await,
        "population resumes under the new settings"
    );
    assert_eq!(pool.status().max_idle, 3);
    assert!(new_dialer.dial_count() >= 3);

    // Acquired connections now come from the new dialer.
    let conn = pool.get().await.unwrap();
    let closed_before = new_dialer.closed_count();
    drop(conn);
    assert_eq!(new_dialer.closed_count(), closed_before + 1);
}

#[tokio::test]
async fn test_restart_without_update_keeps_settings() {
    let dialer = TestDialer::new();
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(2)
        .min_idle(0)
        .build();
    pool.start();
    assert!(wait_for(|| pool.status().idle == 2).await);

    pool.restart(None);

    assert!(wait_for(|| dialer.closed_count() == 2).await);
    assert!(
        wait_for(|| pool.status().idle == 2).await,
        "the pool refills with the same settings"
    );
    assert_eq!(pool.status().max_idle, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_under_concurrent_traffic_conserves_connections() {
    let dialer = TestDialer::new();
    let pool = Pool::builder(Arc::clone(&dialer))
        .max_idle(5)
        .min_idle(1)
        .build();
    pool.start();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            for round in 0..50 {
                match pool.get().await {
                    Ok(conn) => {
                        tokio::task::yield_now().await;
                        if round % 3 == 0 {
                            drop(conn);
                        } else if let Err(conn) = pool.put(conn) {
                            drop(conn);
                        }
                    }
                    Err(PoolError::Released) => break,
                    Err(_) => {}
                }
            }
        }));
    }

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.restart(None);
    }

    for worker in workers {
        worker.await.expect("worker must not panic");
    }

    pool.release();
    assert!(pool.get().await.is_err());

    // Conservation: every connection the dialer ever produced ends up
    // closed exactly once. Nothing leaked, nothing double-freed, nothing
    // handed to two callers.
    let dialer_for_wait = Arc::clone(&dialer);
    assert!(
        wait_for(move || dialer_for_wait.closed_count() == dialer_for_wait.dial_count()).await,
        "dialed {} vs closed {}",
        dialer.dial_count(),
        dialer.closed_count()
    );
}
