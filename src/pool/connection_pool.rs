//! Bounded, health-checked connection pool for one node
//!
//! - `max_total` permits bound the connections handed out at once
//! - idle connections are kept in a deque: returns go to the back, LIFO
//!   borrows take from the back and FIFO borrows from the front, so the
//!   front is always the longest-idle connection
//! - an optional background task examines the longest-idle connections,
//!   closes stale or dead ones and tops the idle set up to `min_idle`

use crate::common::{Error, PoolConfig, PoolMetrics, PoolStats, Result};
use crate::pool::connection::{Connection, Connector};
use crate::topology::{HostPort, NodeDescriptor};
use redis::{Cmd, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

struct IdleConnection {
    conn: Box<dyn Connection>,
    idle_since: Instant,
}

struct PoolInner {
    node: NodeDescriptor,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = self.idle();
        let taken = if self.config.lifo {
            idle.pop_back()
        } else {
            idle.pop_front()
        };
        self.metrics.idle.set(idle.len() as u64);
        taken
    }

    /// Park a connection for reuse, or close it if the pool is full or closed
    fn put_idle(&self, conn: Box<dyn Connection>) {
        let mut idle = self.idle();
        if self.is_closed() || idle.len() >= self.config.max_idle {
            drop(idle);
            self.discard(conn);
            return;
        }
        idle.push_back(IdleConnection {
            conn,
            idle_since: Instant::now(),
        });
        self.metrics.idle.set(idle.len() as u64);
    }

    /// Put an examined connection back at `pos` with its original idle time
    ///
    /// Hands it back to the caller when the pool is closed or the idle set
    /// is full.
    fn repark(&self, pos: usize, entry: IdleConnection) -> Option<IdleConnection> {
        let mut idle = self.idle();
        if self.is_closed() || idle.len() >= self.config.max_idle {
            return Some(entry);
        }
        let pos = pos.min(idle.len());
        idle.insert(pos, entry);
        self.metrics.idle.set(idle.len() as u64);
        None
    }

    fn discard(&self, conn: Box<dyn Connection>) {
        drop(conn);
        self.metrics.connections_closed.inc();
    }

    fn in_use(&self) -> usize {
        self.config
            .max_total
            .saturating_sub(self.permits.available_permits())
    }
}

/// Connection pool for one node
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty pool; connections are opened on demand
    ///
    /// When called inside a tokio runtime and `eviction_interval_ms > 0`, a
    /// background eviction task is started. It stops once the pool is shut
    /// down or dropped.
    pub fn new(node: NodeDescriptor, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let inner = Arc::new(PoolInner {
            permits: Arc::new(Semaphore::new(config.max_total)),
            node,
            config,
            connector,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            metrics: PoolMetrics::default(),
        });

        let interval = inner.config.eviction_interval();
        if !interval.is_zero() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(run_evictor(Arc::downgrade(&inner), interval));
                }
                Err(_) => tracing::warn!(
                    "No tokio runtime; idle eviction disabled for {}",
                    inner.node.addr()
                ),
            }
        }

        Self { inner }
    }

    pub fn node(&self) -> &NodeDescriptor {
        &self.inner.node
    }

    pub fn addr(&self) -> &HostPort {
        self.inner.node.addr()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Connections currently borrowed
    pub fn active_count(&self) -> usize {
        self.inner.in_use()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.metrics.snapshot()
    }

    /// Do two handles refer to the same pool?
    pub fn same_pool(&self, other: &ConnectionPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrow a connection, waiting at most `max_wait` for capacity
    pub async fn borrow(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(Error::PoolClosed(inner.node.addr().to_string()));
        }

        let permit = self.acquire_permit().await?;

        while let Some(candidate) = inner.take_idle() {
            let mut conn = candidate.conn;
            if inner.config.test_on_borrow && !conn.ping().await {
                inner.metrics.validation_failures.inc();
                inner.discard(conn);
                continue;
            }
            return Ok(self.checkout(conn, permit));
        }

        match inner.connector.connect(&inner.node).await {
            Ok(conn) => {
                inner.metrics.connections_created.inc();
                Ok(self.checkout(conn, permit))
            }
            Err(e) => {
                inner.metrics.borrow_failures.inc();
                tracing::warn!("Failed to open connection to {}: {}", inner.node.addr(), e);
                Err(e)
            }
        }
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let inner = &self.inner;
        let max_wait = inner.config.max_wait();
        let exhausted = || {
            inner.metrics.borrow_failures.inc();
            Error::PoolExhausted {
                addr: inner.node.addr().to_string(),
                waited: max_wait,
            }
        };

        if max_wait.is_zero() {
            return match inner.permits.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(exhausted()),
                Err(TryAcquireError::Closed) => {
                    Err(Error::PoolClosed(inner.node.addr().to_string()))
                }
            };
        }

        match tokio::time::timeout(max_wait, inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::PoolClosed(inner.node.addr().to_string())),
            Err(_) => Err(exhausted()),
        }
    }

    fn checkout(&self, conn: Box<dyn Connection>, permit: OwnedSemaphorePermit) -> PooledConnection {
        self.inner.metrics.borrows.inc();
        self.inner.metrics.active.inc();
        PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: self.inner.clone(),
        }
    }

    /// Hand a borrowed connection back; see [`PooledConnection::give_back`]
    pub async fn give_back(&self, conn: PooledConnection, healthy: bool) {
        conn.give_back(healthy).await;
    }

    /// One eviction pass
    ///
    /// Examines up to `num_tests_per_eviction_run` idle connections, oldest
    /// first. A connection is closed when it has been idle for
    /// `min_evictable_idle`, or for `soft_min_evictable_idle` while more than
    /// `min_idle` are idle. With `test_while_idle` the others are pinged and
    /// dead ones closed. Finally the idle set is topped back up to
    /// `min_idle` if capacity allows. Returns the number of connections
    /// closed.
    ///
    /// The connection under test holds a permit, so borrowers never open a
    /// replacement that would push the pool past `max_total`.
    pub async fn evict(&self) -> usize {
        let inner = &self.inner;
        if inner.is_closed() {
            return 0;
        }

        let hard = inner.config.min_evictable_idle();
        let soft = inner.config.soft_min_evictable_idle();
        let mut closed = 0;
        // Examined survivors sit at the front, in their original order
        let mut kept = 0;

        for _ in 0..inner.config.num_tests_per_eviction_run {
            let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
                break;
            };
            let (mut candidate, idle_count) = {
                let mut idle = inner.idle();
                let Some(candidate) = idle.remove(kept) else {
                    break;
                };
                inner.metrics.idle.set(idle.len() as u64);
                (candidate, idle.len() + 1)
            };

            let idle_for = Instant::now().duration_since(candidate.idle_since);
            let stale = idle_for >= hard
                || soft.is_some_and(|soft| idle_for >= soft && idle_count > inner.config.min_idle);
            let alive = !stale && (!inner.config.test_while_idle || candidate.conn.ping().await);

            if alive {
                match inner.repark(kept, candidate) {
                    None => kept += 1,
                    Some(rejected) => {
                        inner.discard(rejected.conn);
                        closed += 1;
                    }
                }
            } else {
                if !stale {
                    inner.metrics.validation_failures.inc();
                }
                inner.discard(candidate.conn);
                closed += 1;
            }
            drop(permit);
        }

        inner.metrics.evictions.add(closed as u64);
        if closed > 0 {
            tracing::debug!("Evicted {} idle connections from {}", closed, inner.node.addr());
        }

        self.ensure_min_idle().await;
        closed
    }

    async fn ensure_min_idle(&self) {
        let inner = &self.inner;
        loop {
            if inner.is_closed() {
                return;
            }
            let needed = {
                let idle = inner.idle();
                idle.len() < inner.config.min_idle
                    && idle.len() + inner.in_use() < inner.config.max_total
            };
            if !needed {
                return;
            }
            // Hold a permit while connecting so the new connection counts
            // against max_total until it is parked.
            let Ok(_permit) = inner.permits.clone().try_acquire_owned() else {
                return;
            };
            match inner.connector.connect(&inner.node).await {
                Ok(conn) => {
                    inner.metrics.connections_created.inc();
                    inner.put_idle(conn);
                }
                Err(e) => {
                    tracing::warn!("Could not refill idle pool for {}: {}", inner.node.addr(), e);
                    return;
                }
            }
        }
    }

    /// Close every idle connection and reject further borrows
    ///
    /// Connections still borrowed are closed when they come back.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.permits.close();
        let drained: Vec<IdleConnection> = {
            let mut idle = inner.idle();
            let drained = idle.drain(..).collect();
            inner.metrics.idle.set(0);
            drained
        };
        let count = drained.len();
        for idle in drained {
            inner.discard(idle.conn);
        }
        tracing::info!(
            "Pool for {} shut down ({} idle connections closed)",
            inner.node.addr(),
            count
        );
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", self.addr())
            .field("idle", &self.idle_count())
            .field("active", &self.active_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_evictor(pool: Weak<PoolInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }
        ConnectionPool { inner }.evict().await;
    }
}

/// A borrowed connection
///
/// Return it with [`give_back`](PooledConnection::give_back). Dropping it
/// instead closes the connection, since it may have been abandoned
/// mid-request.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub async fn execute(&mut self, cmd: &Cmd) -> Result<Value> {
        match self.conn.as_mut() {
            Some(conn) => conn.execute(cmd).await,
            None => Err(Error::Internal("connection already returned".into())),
        }
    }

    pub async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => false,
        }
    }

    pub fn addr(&self) -> &HostPort {
        self.pool.node.addr()
    }

    /// Return the connection to its pool
    ///
    /// Healthy connections rejoin the idle set (after a ping when
    /// `test_on_return` is set); unhealthy ones are closed and replaced
    /// lazily by a later borrow.
    pub async fn give_back(mut self, healthy: bool) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = self.pool.clone();
        pool.metrics.active.dec();

        if !healthy || pool.is_closed() {
            pool.discard(conn);
        } else if pool.config.test_on_return && !conn.ping().await {
            pool.metrics.validation_failures.inc();
            pool.discard(conn);
        } else {
            pool.put_idle(conn);
        }
        // Release capacity only after the connection is parked, so a waiter
        // woken by the permit finds it.
        drop(permit);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.metrics.active.dec();
            self.pool.discard(conn);
        }
    }
}
