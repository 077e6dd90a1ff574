//! One pool per master address
//!
//! Pools outlive topology snapshots: a refresh that keeps the same master
//! reuses its pool, so warm connections survive the swap.

use crate::common::{Error, PoolConfig, Result};
use crate::pool::connection::Connector;
use crate::pool::connection_pool::ConnectionPool;
use crate::topology::{HostPort, NodeDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct PoolRegistry {
    pools: Mutex<HashMap<HostPort, ConnectionPool>>,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    closed: AtomicBool,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            config,
            connector,
            closed: AtomicBool::new(false),
        }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<HostPort, ConnectionPool>> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pool for `node`, created on first use
    pub fn get_or_create(&self, node: &NodeDescriptor) -> Result<ConnectionPool> {
        let mut pools = self.pools();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        if let Some(pool) = pools.get(node.addr()) {
            return Ok(pool.clone());
        }
        tracing::info!("Creating connection pool for {}", node);
        let pool = ConnectionPool::new(node.clone(), self.config.clone(), self.connector.clone());
        pools.insert(node.addr().clone(), pool.clone());
        Ok(pool)
    }

    pub fn get(&self, addr: &HostPort) -> Option<ConnectionPool> {
        self.pools().get(addr).cloned()
    }

    /// Drop every pool whose address is not in `keep` and return them
    ///
    /// The caller decides when to shut the removed pools down.
    pub fn retain_only(&self, keep: &HashSet<HostPort>) -> Vec<ConnectionPool> {
        let mut pools = self.pools();
        let stale: Vec<HostPort> = pools
            .keys()
            .filter(|addr| !keep.contains(*addr))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|addr| pools.remove(&addr))
            .collect()
    }

    /// Shut down every pool and refuse new ones
    pub fn shutdown_all(&self) {
        let drained: Vec<ConnectionPool> = {
            let mut pools = self.pools();
            self.closed.store(true, Ordering::Release);
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.shutdown();
        }
    }

    pub fn addrs(&self) -> Vec<HostPort> {
        let mut addrs: Vec<HostPort> = self.pools().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.pools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools().is_empty()
    }
}
