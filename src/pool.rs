//! Connection pooling per endpoint
//!
//! Every endpoint gets its own partition with a fixed capacity. A semaphore
//! permit is held for as long as a connection is leased, so
//! `idle + leased <= capacity` holds for each partition:
//! - a connection is only opened by a permit holder that found no idle one
//! - a released connection is parked as idle *before* its permit is returned,
//!   so the next waiter woken by the semaphore finds it
//!
//! Waiters are served by the semaphore in FIFO order. Capacity is not shared
//! across endpoints, so a lease on one endpoint never blocks another.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

use crate::endpoint::Endpoint;
use crate::transport::{Connector, Poolable, TransportError};

/// Upper bound on the idle reaper period
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live connections (idle + leased) per endpoint
    pub max_connections_per_host: usize,
    /// Maximum idle connections kept per endpoint
    pub max_idle_per_host: usize,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
    /// Bound on waiting for a free slot; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 256,
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            acquire_timeout: None,
        }
    }
}

struct IdleConnection<T> {
    conn: T,
    idle_since: Instant,
}

struct IdleState<T> {
    idle: VecDeque<IdleConnection<T>>,
    closed: bool,
}

/// Pool partition for a single endpoint
struct HostPool<T> {
    endpoint: Endpoint,
    capacity: usize,
    max_idle: usize,
    /// One permit per leased connection
    semaphore: Arc<Semaphore>,
    state: Mutex<IdleState<T>>,
    live: AtomicUsize,
    leased: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Poolable> HostPool<T> {
    fn new(endpoint: Endpoint, capacity: usize, max_idle: usize) -> Self {
        Self {
            endpoint,
            capacity,
            max_idle,
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Mutex::new(IdleState {
                idle: VecDeque::new(),
                closed: false,
            }),
            live: AtomicUsize::new(0),
            leased: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Pop the most recently used idle connection that is still usable
    fn take_idle(&self, idle_timeout: Duration) -> Option<T> {
        let now = Instant::now();
        let mut expired = Vec::new();

        let found = {
            let mut state = self.state.lock();
            loop {
                match state.idle.pop_back() {
                    Some(entry) => {
                        if now.duration_since(entry.idle_since) < idle_timeout
                            && entry.conn.is_open()
                        {
                            break Some(entry.conn);
                        }
                        expired.push(entry.conn);
                    }
                    None => break None,
                }
            }
        };

        for conn in expired {
            self.discard(conn);
        }
        found
    }

    /// Park a connection as idle, or close it if it cannot be reused
    fn check_in(&self, conn: T) {
        let rejected = {
            let mut state = self.state.lock();
            if state.closed || !conn.is_open() || state.idle.len() >= self.max_idle {
                Some(conn)
            } else {
                state.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            }
        };

        if let Some(conn) = rejected {
            self.discard(conn);
        }
    }

    fn discard(&self, conn: T) {
        drop(conn);
        self.live.fetch_sub(1, Ordering::AcqRel);
        trace!("Closed connection to {}", self.endpoint);
    }

    fn evict_expired(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let removed: Vec<T> = {
            let mut state = self.state.lock();
            let (keep, remove): (VecDeque<_>, VecDeque<_>) =
                state.idle.drain(..).partition(|entry| {
                    now.duration_since(entry.idle_since) < idle_timeout && entry.conn.is_open()
                });
            state.idle = keep;
            remove.into_iter().map(|entry| entry.conn).collect()
        };

        let count = removed.len();
        for conn in removed {
            self.discard(conn);
        }
        count
    }

    fn shutdown(&self) {
        let drained: Vec<T> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.idle.drain(..).map(|entry| entry.conn).collect()
        };
        self.semaphore.close();

        for conn in drained {
            self.discard(conn);
        }
    }

    fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }
}

/// A connection checked out of the pool.
///
/// Ending a lease with [`Lease::release`] returns the connection to its
/// partition; dropping it any other way closes the connection. Either way the
/// capacity slot is given back.
pub struct Lease<T: Poolable> {
    conn: Option<T>,
    host: Arc<HostPool<T>>,
    permit: Option<OwnedSemaphorePermit>,
    reusable: bool,
    reused: bool,
}

impl<T: Poolable> Lease<T> {
    fn new(conn: T, permit: OwnedSemaphorePermit, host: Arc<HostPool<T>>, reused: bool) -> Self {
        host.leased.fetch_add(1, Ordering::AcqRel);
        Self {
            conn: Some(conn),
            host,
            permit: Some(permit),
            reusable: true,
            reused,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.host.endpoint
    }

    /// Whether this connection came out of the idle set
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Whether the connection will go back to the idle set on release
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Flag the connection as unfit for reuse; release will close it
    pub fn mark_closed(&mut self) {
        self.reusable = false;
    }

    pub fn connection(&self) -> &T {
        self.conn.as_ref().expect("lease holds a connection until finished")
    }

    pub fn connection_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("lease holds a connection until finished")
    }

    /// Leased -> Idle, or Leased -> Closed if the connection is marked
    /// closed or no longer open
    pub fn release(mut self) {
        self.finish(true);
    }

    /// Leased -> Closed
    pub fn close(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, keep: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if keep && self.reusable {
            self.host.check_in(conn);
        } else {
            self.host.discard(conn);
        }
        self.host.leased.fetch_sub(1, Ordering::AcqRel);

        // Return the slot only after the connection is parked
        drop(self.permit.take());
    }
}

impl<T: Poolable> Drop for Lease<T> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            trace!("Lease on {} dropped without release", self.host.endpoint);
            self.finish(false);
        }
    }
}

impl<T: Poolable> std::fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", &self.host.endpoint)
            .field("reusable", &self.reusable)
            .field("reused", &self.reused)
            .finish()
    }
}

/// Point-in-time view of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    pub capacity: usize,
    pub idle: usize,
    pub leased: usize,
    pub live: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Point-in-time view of the whole pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub endpoints: usize,
    pub idle: usize,
    pub leased: usize,
    pub live: usize,
    pub acquires: u64,
}

/// Bounded connection pool keyed by endpoint
pub struct ConnectionPool<C: Connector> {
    config: PoolConfig,
    connector: C,
    pools: DashMap<Endpoint, Arc<HostPool<C::Connection>>>,
    disposed: AtomicBool,
    total_acquires: AtomicU64,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool. When called inside a tokio runtime an idle reaper task
    /// is started; it stops once the pool is dropped or disposed.
    pub fn new(config: PoolConfig, connector: C) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            connector,
            pools: DashMap::new(),
            disposed: AtomicBool::new(false),
            total_acquires: AtomicU64::new(0),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let period = pool
                .config
                .idle_timeout
                .clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL);
            handle.spawn(cleanup_loop(Arc::downgrade(&pool), period));
        }

        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn get_or_create_pool(&self, endpoint: &Endpoint) -> Arc<HostPool<C::Connection>> {
        if let Some(pool) = self.pools.get(endpoint) {
            return pool.clone();
        }
        self.pools
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(HostPool::new(
                    endpoint.clone(),
                    self.config.max_connections_per_host.max(1),
                    self.config.max_idle_per_host,
                ))
            })
            .clone()
    }

    /// Check out a connection for `endpoint`.
    ///
    /// Reuses an idle connection when one is available, opens a new one when
    /// the partition has spare capacity, and otherwise waits for a lease on
    /// the same endpoint to end.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Lease<C::Connection>, PoolError> {
        if self.is_disposed() {
            return Err(PoolError::Closed);
        }
        self.total_acquires.fetch_add(1, Ordering::Relaxed);

        let host = self.get_or_create_pool(endpoint);
        if self.is_disposed() {
            host.shutdown();
            return Err(PoolError::Closed);
        }

        let semaphore = host.semaphore.clone();
        let permit = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, semaphore.acquire_owned())
                .await
                .map_err(|_| PoolError::AcquireTimeout(limit))?,
            None => semaphore.acquire_owned().await,
        }
        .map_err(|_| PoolError::Closed)?;

        if let Some(conn) = host.take_idle(self.config.idle_timeout) {
            host.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Reusing idle connection to {}", endpoint);
            return Ok(Lease::new(conn, permit, host, true));
        }

        host.misses.fetch_add(1, Ordering::Relaxed);
        // The permit is dropped if connecting fails or is cancelled
        let conn = self.connector.connect(endpoint).await?;
        host.live.fetch_add(1, Ordering::AcqRel);
        trace!("Opened new connection to {}", endpoint);

        Ok(Lease::new(conn, permit, host, false))
    }

    /// Return a leased connection to its partition
    pub fn release(&self, lease: Lease<C::Connection>) {
        lease.release();
    }

    /// Close every connection and fail all current and future waiters.
    /// Leases still out are closed when they end.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.pools.iter() {
            entry.value().shutdown();
        }
        trace!("Connection pool disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn host_stats(&self, endpoint: &Endpoint) -> Option<HostStats> {
        self.pools.get(endpoint).map(|pool| HostStats {
            capacity: pool.capacity,
            idle: pool.idle_len(),
            leased: pool.leased.load(Ordering::Acquire),
            live: pool.live.load(Ordering::Acquire),
            hits: pool.hits.load(Ordering::Relaxed),
            misses: pool.misses.load(Ordering::Relaxed),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            endpoints: self.pools.len(),
            acquires: self.total_acquires.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        for entry in self.pools.iter() {
            let pool = entry.value();
            stats.idle += pool.idle_len();
            stats.leased += pool.leased.load(Ordering::Acquire);
            stats.live += pool.live.load(Ordering::Acquire);
        }
        stats
    }

    fn evict_expired(&self) {
        for entry in self.pools.iter() {
            let removed = entry.value().evict_expired(self.config.idle_timeout);
            if removed > 0 {
                trace!("Cleaned up {} idle connections for {}", removed, entry.key());
            }
        }

        // A partition nobody else references can be rebuilt on demand. The
        // map's shard lock is held while checking, so no acquire can clone it
        // in between.
        self.pools.retain(|endpoint, pool| {
            let unused = Arc::strong_count(pool) == 1
                && pool.live.load(Ordering::Acquire) == 0
                && pool.idle_len() == 0;
            if unused {
                trace!("Dropped empty partition for {}", endpoint);
            }
            !unused
        });
    }
}

impl<C: Connector> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        let leased: usize = self
            .pools
            .iter()
            .map(|entry| entry.value().leased.load(Ordering::Acquire))
            .sum();
        if leased > 0 {
            warn!("Connection pool dropped with {} leased connections", leased);
        }
        self.dispose();
    }
}

/// Background cleanup of expired idle connections
async fn cleanup_loop<C: Connector>(pool: Weak<ConnectionPool<C>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(pool) = pool.upgrade() else {
            break;
        };
        if pool.is_disposed() {
            break;
        }
        pool.evict_expired();
    }
}

/// Pool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("timeout waiting for connection pool slot after {0:?}")]
    AcquireTimeout(Duration),

    #[error("connection pool closed")]
    Closed,

    #[error(transparent)]
    Connect(#[from] TransportError),
}
