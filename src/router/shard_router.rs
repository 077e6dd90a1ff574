//! Shard router: owns the topology snapshot and the master pools

use crate::common::{ClusterConfig, Error, Result};
use crate::pool::{ConnectionPool, Connector, PoolRegistry, RedisConnector};
use crate::router::index::{ShardIndex, ShardSlot};
use crate::topology::{
    group, GroupResolver, HostPort, InfoProber, NodeDescriptor, ReplicaSet, ResolvedGroup,
    RoleProber,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Routes keys to the master of the owning group
///
/// Routing reads the current [`ShardIndex`] snapshot and never blocks on a
/// refresh. A refresh resolves the topology again, builds a new snapshot and
/// swaps it in; callers that already routed keep the snapshot they used.
pub struct ShardRouter {
    config: ClusterConfig,
    sets: BTreeMap<u32, ReplicaSet>,
    resolver: GroupResolver,
    registry: PoolRegistry,
    snapshot: RwLock<Arc<ShardIndex>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl ShardRouter {
    /// Resolve the configured topology with the default `redis` transport
    pub async fn initialize(config: ClusterConfig) -> Result<Self> {
        let connector: Arc<dyn Connector> = Arc::new(RedisConnector);
        let prober = Arc::new(InfoProber::new(connector.clone()));
        Self::initialize_with(config, prober, connector).await
    }

    /// Resolve the configured topology with a custom prober and transport
    ///
    /// Fails with `InvalidTopology` when no nodes are configured or when a
    /// group has no reachable member. A group whose members answer but none
    /// is master is accepted; routing to it fails until a refresh finds one.
    pub async fn initialize_with(
        config: ClusterConfig,
        prober: Arc<dyn RoleProber>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let descriptors: Vec<NodeDescriptor> =
            config.nodes.iter().map(NodeDescriptor::from).collect();
        let sets = group(&descriptors);
        tracing::info!(
            "Resolving {} nodes in {} groups",
            descriptors.len(),
            sets.len()
        );

        let resolver = GroupResolver::new(prober);
        let resolved = resolver.resolve(&sets).await?;

        if let Some(dead) = resolved.values().find(|g| !g.is_reachable()) {
            return Err(Error::InvalidTopology(format!(
                "group {} has no reachable members",
                dead.group_id
            )));
        }

        let registry = PoolRegistry::new(config.pool.clone(), connector);
        let index = build_index(1, &resolved, &registry, &config)?;
        tracing::info!(
            "Shard router ready: {} groups, {} masters",
            index.len(),
            registry.len()
        );

        Ok(Self {
            config,
            sets,
            resolver,
            registry,
            snapshot: RwLock::new(Arc::new(index)),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current routing snapshot
    pub fn snapshot(&self) -> Arc<ShardIndex> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    pub fn groups(&self) -> Vec<Arc<ResolvedGroup>> {
        self.snapshot().groups().cloned().collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pool of the master that owns `key`
    pub fn route(&self, key: &[u8]) -> Result<ConnectionPool> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        self.snapshot().route(key)
    }

    /// Re-probe every group and swap in a new snapshot
    ///
    /// Concurrent refreshes run one after the other. Pools of nodes that are
    /// no longer master of any group leave the registry after the swap. Older
    /// snapshots and in-flight calls keep using them until the last handle
    /// drops, which closes their idle connections.
    pub async fn refresh(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        let _guard = self.refresh_lock.lock().await;

        let resolved = self.resolver.resolve(&self.sets).await?;
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let index = build_index(generation, &resolved, &self.registry, &self.config)?;

        let previous = self.snapshot();
        log_master_changes(&previous, &index);

        let keep: HashSet<HostPort> = index
            .groups()
            .filter_map(|g| g.master_addr().cloned())
            .collect();

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(index);

        for retired in self.registry.retain_only(&keep) {
            tracing::info!("Retiring pool for {}", retired.addr());
        }

        tracing::debug!("Topology refreshed (generation {})", generation);
        Ok(())
    }

    /// Run [`refresh`](Self::refresh) every `interval` until the router is
    /// shut down or dropped
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let router = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                if router.is_shutdown() {
                    break;
                }
                if let Err(e) = router.refresh().await {
                    tracing::warn!("Topology refresh failed: {}", e);
                }
            }
            tracing::debug!("Refresh task stopped");
        })
    }

    /// Close every pool and reject further routing
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.shutdown_all();
        tracing::info!("Shard router shut down");
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }
}

fn build_index(
    generation: u64,
    resolved: &BTreeMap<u32, Arc<ResolvedGroup>>,
    registry: &PoolRegistry,
    config: &ClusterConfig,
) -> Result<ShardIndex> {
    let mut slots = Vec::with_capacity(resolved.len());
    for group in resolved.values() {
        let pool = match &group.master {
            Some(master) => Some(registry.get_or_create(master)?),
            None => None,
        };
        slots.push(ShardSlot {
            group: group.clone(),
            pool,
        });
    }
    ShardIndex::new(generation, slots, &config.routing)
}

fn log_master_changes(previous: &ShardIndex, next: &ShardIndex) {
    let before: BTreeMap<u32, Option<&HostPort>> = previous
        .groups()
        .map(|g| (g.group_id, g.master_addr()))
        .collect();

    for group in next.groups() {
        let old = before.get(&group.group_id).copied().flatten();
        match (old, group.master_addr()) {
            (Some(old), Some(new)) if old != new => {
                tracing::info!("Group {}: master changed {} -> {}", group.group_id, old, new)
            }
            (None, Some(new)) => {
                tracing::info!("Group {}: master elected {}", group.group_id, new)
            }
            (Some(old), None) => {
                tracing::warn!("Group {}: lost master {}", group.group_id, old)
            }
            _ => {}
        }
    }
}
