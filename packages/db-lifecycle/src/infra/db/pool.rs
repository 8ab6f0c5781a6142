//! Bounded pool of physical connections.
//!
//! In-use connections are bounded by a semaphore with `max` permits; idle
//! connections sit in a queue guarded by a mutex. A connection is only opened
//! when a permit is held and the idle queue is empty, so idle + in-use never
//! exceeds `max`. A background task evicts connections idle for longer than
//! `idle_timeout`, never shrinking the pool below `min`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::db::PoolBounds;
use crate::infra::db::diagnostics::lifecycle_counters;

/// Opens and closes the physical connections a [`Pool`] hands out.
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    async fn close(&self, conn: Self::Connection);
}

#[derive(Debug, Error)]
pub enum PoolError<E: std::error::Error + 'static> {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Timed out after {waited:?} waiting for a pooled connection")]
    Timeout { waited: Duration },

    #[error("Connection pool is closed")]
    Closed,

    #[error("Failed to open a pooled connection: {0}")]
    Connect(#[source] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
    pub max: u32,
}

struct IdleConn<C> {
    conn: C,
    since: Instant,
}

struct Shared<M: ManageConnection> {
    manager: M,
    bounds: PoolBounds,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn<M::Connection>>>,
    size: AtomicU32,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl<M: ManageConnection> Shared<M> {
    fn put_back(shared: &Arc<Self>, conn: M::Connection) {
        // `closed` is only set while holding the idle lock, so nothing can be
        // queued after `close` has drained the queue.
        let conn = {
            let mut idle = shared.idle.lock();
            if !shared.closed.load(Ordering::Acquire) {
                idle.push_back(IdleConn {
                    conn,
                    since: Instant::now(),
                });
                return;
            }
            conn
        };

        shared.size.fetch_sub(1, Ordering::AcqRel);
        lifecycle_counters::connection_closed();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let shared = Arc::clone(shared);
                rt.spawn(async move { shared.manager.close(conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    /// Close idle connections past `idle_timeout`, oldest first, keeping `min`.
    async fn evict_idle(&self) -> u32 {
        let now = Instant::now();
        let expired: Vec<M::Connection> = {
            let mut idle = self.idle.lock();
            let mut out = Vec::new();
            let mut i = 0;
            while i < idle.len() {
                if self.size.load(Ordering::Acquire) <= self.bounds.min {
                    break;
                }
                if now.duration_since(idle[i].since) >= self.bounds.idle_timeout {
                    if let Some(entry) = idle.remove(i) {
                        self.size.fetch_sub(1, Ordering::AcqRel);
                        out.push(entry.conn);
                    }
                } else {
                    i += 1;
                }
            }
            out
        };

        let evicted = expired.len() as u32;
        for conn in expired {
            lifecycle_counters::connection_evicted();
            self.manager.close(conn).await;
        }
        if evicted > 0 {
            debug!(
                "pool=evict evicted={} size={} min={}",
                evicted,
                self.size.load(Ordering::Acquire),
                self.bounds.min
            );
        }
        evicted
    }
}

impl<M: ManageConnection> Drop for Shared<M> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Build a pool. No connection is opened until the first `acquire`.
    ///
    /// When called inside a tokio runtime the eviction task starts right away.
    pub fn new(manager: M, bounds: PoolBounds) -> Result<Self, PoolError<M::Error>> {
        if bounds.max == 0 {
            return Err(PoolError::Config {
                message: "pool max must be at least 1".to_string(),
            });
        }
        if bounds.min > bounds.max {
            return Err(PoolError::Config {
                message: format!("pool min ({}) exceeds pool max ({})", bounds.min, bounds.max),
            });
        }
        if bounds.eviction_interval.is_zero() {
            return Err(PoolError::Config {
                message: "pool eviction interval must be non-zero".to_string(),
            });
        }

        let shared = Arc::new(Shared {
            manager,
            permits: Arc::new(Semaphore::new(bounds.max as usize)),
            idle: Mutex::new(VecDeque::with_capacity(bounds.max as usize)),
            size: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            bounds,
        });

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(run_evictor(
                    Arc::downgrade(&shared),
                    shared.bounds.eviction_interval,
                    shared.shutdown.clone(),
                ));
            }
            Err(_) => warn!("pool=created outside a tokio runtime; idle eviction disabled"),
        }

        Ok(Self { shared })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Wait for a connection, opening a new one if below `max`.
    ///
    /// Waiting and opening share one `acquire_timeout` deadline.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        let start = Instant::now();
        let deadline = self.shared.bounds.acquire_timeout;

        match tokio::time::timeout(deadline, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                lifecycle_counters::acquire_timeout();
                let status = self.status();
                warn!(
                    "pool=acquire_timeout waited_ms={} size={} in_use={} max={}",
                    start.elapsed().as_millis(),
                    status.size,
                    status.in_use,
                    status.max
                );
                Err(PoolError::Timeout {
                    waited: start.elapsed(),
                })
            }
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let reused = self.shared.idle.lock().pop_back();
        if let Some(entry) = reused {
            trace!("pool=reuse idle_ms={}", entry.since.elapsed().as_millis());
            return Ok(PooledConnection::new(entry.conn, &self.shared, permit));
        }

        let conn = self
            .shared
            .manager
            .connect()
            .await
            .map_err(PoolError::Connect)?;
        let size = self.shared.size.fetch_add(1, Ordering::AcqRel) + 1;
        lifecycle_counters::connection_opened();
        debug!("pool=open size={} max={}", size, self.shared.bounds.max);

        Ok(PooledConnection::new(conn, &self.shared, permit))
    }

    /// Return a connection to the idle queue. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Open connections until at least `min` are live.
    pub async fn warm_up(&self) -> Result<u32, PoolError<M::Error>> {
        let before = self.shared.size.load(Ordering::Acquire);
        let mut held = Vec::new();
        while (held.len() as u32) < self.shared.bounds.min {
            held.push(self.acquire().await?);
        }
        drop(held);
        Ok(self.shared.size.load(Ordering::Acquire).saturating_sub(before))
    }

    /// Run one eviction sweep now instead of waiting for the next tick.
    pub async fn evict_idle(&self) -> u32 {
        self.shared.evict_idle().await
    }

    pub fn status(&self) -> PoolStatus {
        let size = self.shared.size.load(Ordering::Acquire);
        let idle = self.shared.idle.lock().len() as u32;
        PoolStatus {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            max: self.shared.bounds.max,
        }
    }

    /// Stop eviction, close idle connections and refuse further acquires.
    /// Connections still in use are closed as they are returned.
    pub async fn close(&self) {
        let drained: Vec<M::Connection> = {
            let mut idle = self.shared.idle.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            idle.drain(..).map(|entry| entry.conn).collect()
        };
        self.shared.shutdown.cancel();
        self.shared.permits.close();

        let count = drained.len();
        for conn in drained {
            self.shared.size.fetch_sub(1, Ordering::AcqRel);
            lifecycle_counters::connection_closed();
            self.shared.manager.close(conn).await;
        }
        debug!(
            "pool=closed drained={} still_in_use={}",
            count,
            self.shared.size.load(Ordering::Acquire)
        );
    }
}

async fn run_evictor<M: ManageConnection>(
    shared: Weak<Shared<M>>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.evict_idle().await;
            }
        }
    }
    trace!("pool=evictor_stopped");
}

/// A connection checked out of a [`Pool`]; goes back to idle on drop.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    shared: Arc<Shared<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(conn: M::Connection, shared: &Arc<Shared<M>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            shared: Arc::clone(shared),
            _permit: permit,
        }
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    // `conn` is only taken in `drop`.
    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        // The permit field drops after this, so a waiter woken by it finds
        // the connection already queued.
        if let Some(conn) = self.conn.take() {
            Shared::put_back(&self.shared, conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Default)]
    struct Counts {
        opened: AtomicU32,
        closed: AtomicU32,
        refuse: AtomicBool,
    }

    struct FakeManager {
        counts: Arc<Counts>,
    }

    #[async_trait]
    impl ManageConnection for FakeManager {
        type Connection = u32;
        type Error = Refused;

        async fn connect(&self) -> Result<u32, Refused> {
            if self.counts.refuse.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(self.counts.opened.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn close(&self, _conn: u32) {
            self.counts.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bounds(min: u32, max: u32) -> PoolBounds {
        PoolBounds {
            min,
            max,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(50),
            eviction_interval: Duration::from_secs(60),
        }
    }

    fn pool(b: PoolBounds) -> (Pool<FakeManager>, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let pool = Pool::new(
            FakeManager {
                counts: Arc::clone(&counts),
            },
            b,
        )
        .unwrap();
        (pool, counts)
    }

    #[tokio::test]
    async fn test_zero_max_is_a_config_error() {
        let counts = Arc::new(Counts::default());
        let result = Pool::new(FakeManager { counts }, bounds(0, 0));
        assert!(matches!(result, Err(PoolError::Config { .. })));
    }

    #[tokio::test]
    async fn test_min_above_max_is_a_config_error() {
        let counts = Arc::new(Counts::default());
        let result = Pool::new(FakeManager { counts }, bounds(3, 2));
        assert!(matches!(result, Err(PoolError::Config { .. })));
    }

    #[tokio::test]
    async fn test_acquire_is_lazy_and_reuses_released_connections() {
        let (pool, counts) = pool(bounds(0, 2));
        assert_eq!(pool.status().size, 0);

        let first = pool.acquire().await.unwrap();
        let id = *first;
        pool.release(first);

        let again = pool.acquire().await.unwrap();
        assert_eq!(*again, id);
        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_beyond_max_times_out() {
        let (pool, _counts) = pool(bounds(0, 2));
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let status = pool.status();
        assert_eq!(status.in_use, 2);
        assert_eq!(status.idle, 0);

        match pool.acquire().await {
            Err(PoolError::Timeout { waited }) => {
                assert!(waited >= Duration::from_millis(50));
            }
            Err(other) => panic!("expected timeout, got {other}"),
            Ok(_) => panic!("expected timeout, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_blocked_acquire_wakes_on_release() {
        let mut b = bounds(0, 1);
        b.acquire_timeout = Duration::from_secs(2);
        let (pool, counts) = pool(b);

        let held = pool.acquire().await.unwrap();
        let held_id = *held;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| *c) })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        drop(held);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, held_id);
        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_permit() {
        let (pool, counts) = pool(bounds(0, 1));
        counts.refuse.store(true, Ordering::SeqCst);
        assert!(matches!(pool.acquire().await, Err(PoolError::Connect(_))));

        counts.refuse.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.status().size, 1);
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_connections() {
        let (pool, counts) = pool(bounds(2, 4));
        let opened = pool.warm_up().await.unwrap();
        assert_eq!(opened, 2);
        assert_eq!(counts.opened.load(Ordering::SeqCst), 2);

        let status = pool.status();
        assert_eq!(status.size, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(status.in_use, 0);
    }

    #[tokio::test]
    async fn test_background_eviction_stops_at_min() {
        let b = PoolBounds {
            min: 1,
            max: 3,
            idle_timeout: Duration::from_millis(30),
            acquire_timeout: Duration::from_millis(200),
            eviction_interval: Duration::from_millis(10),
        };
        let (pool, counts) = pool(b);

        let held: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        drop(held);
        assert_eq!(pool.status().idle, 3);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let status = pool.status();
        assert_eq!(status.size, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_idle_connections_are_not_evicted() {
        let (pool, counts) = pool(bounds(0, 2));
        let conn = pool.acquire().await.unwrap();
        drop(conn);

        assert_eq!(pool.evict_idle().await, 0);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_drains_idle_and_refuses_acquire() {
        let (pool, counts) = pool(bounds(0, 2));
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);

        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(counts.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));

        // In-use connection is closed once returned.
        drop(b);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counts.closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().size, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_returns_leaves_nothing_idle() {
        for _ in 0..20 {
            let (pool, counts) = pool(bounds(0, 4));
            let mut workers = Vec::new();
            for _ in 0..8 {
                let pool = pool.clone();
                workers.push(tokio::spawn(async move {
                    loop {
                        match pool.acquire().await {
                            Ok(conn) => {
                                tokio::task::yield_now().await;
                                drop(conn);
                            }
                            Err(PoolError::Closed) => break,
                            Err(_) => continue,
                        }
                    }
                }));
            }

            tokio::time::sleep(Duration::from_millis(2)).await;
            pool.close().await;
            for worker in workers {
                worker.await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;

            let status = pool.status();
            assert_eq!(status.idle, 0);
            assert_eq!(status.size, 0);
            assert_eq!(
                counts.opened.load(Ordering::SeqCst),
                counts.closed.load(Ordering::SeqCst)
            );
        }
    }
}
