//! Configuration for shardkv clients
//!
//! Loaded from a TOML file with `SHARDKV__*` environment overrides, e.g.
//! `SHARDKV__POOL__MAX_TOTAL=32`.
//!
//! ```toml
//! refresh_interval_ms = 0
//!
//! [[nodes]]
//! host = "10.0.0.1"
//! port = 6301
//! group_id = 1
//!
//! [[nodes]]
//! host = "10.0.0.2"
//! port = 6301
//! group_id = 1
//!
//! [pool]
//! max_total = 16
//!
//! [routing]
//! strategy = "ring"
//! ```

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Store endpoints, in configuration order
    pub nodes: Vec<NodeConfig>,

    /// Tuning for every per-master connection pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Key routing strategy
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Background topology refresh period (0 disables it)
    #[serde(default)]
    pub refresh_interval_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One configured store endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Shared by every node of one master/replica group
    pub group_id: u32,
    /// Connect and read timeout for this node
    #[serde(default = "default_node_timeout")]
    pub timeout_ms: u64,
}

fn default_node_timeout() -> u64 {
    2_000
}

/// One hour
const MAX_NODE_TIMEOUT_MS: u64 = 3_600_000;

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, group_id: u32) -> Self {
        Self {
            host: host.into(),
            port,
            group_id,
            timeout_ms: default_node_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Connection pool tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on idle + in-use connections
    pub max_total: usize,
    /// Upper bound on idle connections kept for reuse
    pub max_idle: usize,
    /// Each eviction pass tops the idle set back up to this
    pub min_idle: usize,
    /// How long `borrow()` waits for capacity (0 fails immediately)
    pub max_wait_ms: u64,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
    /// Background eviction period (0 disables the eviction task)
    pub eviction_interval_ms: u64,
    /// Idle time after which a connection is always evicted
    pub min_evictable_idle_ms: u64,
    /// Idle time after which a connection is evicted while more than
    /// `min_idle` are idle (0 disables it)
    pub soft_min_evictable_idle_ms: u64,
    /// Idle connections examined by one eviction pass, oldest first
    pub num_tests_per_eviction_run: usize,
    /// Reuse the most recently returned connection first
    pub lifo: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 8,
            max_idle: 8,
            min_idle: 0,
            max_wait_ms: 2_000,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: true,
            eviction_interval_ms: 30_000,
            min_evictable_idle_ms: 60_000,
            soft_min_evictable_idle_ms: 0,
            num_tests_per_eviction_run: 3,
            lifo: true,
        }
    }
}

impl PoolConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_ms)
    }

    pub fn soft_min_evictable_idle(&self) -> Option<Duration> {
        match self.soft_min_evictable_idle_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(Error::InvalidConfig("pool.max_total must be > 0".into()));
        }
        if self.min_idle > self.max_idle {
            return Err(Error::InvalidConfig(format!(
                "pool.min_idle ({}) exceeds pool.max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.max_idle > self.max_total {
            return Err(Error::InvalidConfig(format!(
                "pool.max_idle ({}) exceeds pool.max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Hash modulo group count; reshuffles keys when the group count changes
    Modulo,
    /// Consistent-hash ring with virtual points per group
    Ring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
    /// Ring points per group (ring strategy only)
    pub virtual_nodes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Modulo,
            virtual_nodes: 160,
        }
    }
}

impl ClusterConfig {
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            pool: PoolConfig::default(),
            routing: RoutingConfig::default(),
            refresh_interval_ms: 0,
            log_level: default_log_level(),
        }
    }

    /// Load from a TOML file, then apply `SHARDKV__*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SHARDKV")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: ClusterConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from an in-memory TOML document (no environment overrides)
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let cfg: ClusterConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.refresh_interval_ms))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidTopology("no nodes configured".into()));
        }
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "node in group {} has an empty host",
                    node.group_id
                )));
            }
            if node.port == 0 {
                return Err(Error::InvalidConfig(format!(
                    "node {} has port 0",
                    node.host
                )));
            }
            if node.timeout_ms == 0 || node.timeout_ms > MAX_NODE_TIMEOUT_MS {
                return Err(Error::InvalidConfig(format!(
                    "node {}:{} timeout_ms must be in 1..={}, got {}",
                    node.host, node.port, MAX_NODE_TIMEOUT_MS, node.timeout_ms
                )));
            }
        }

        // Listing a node twice in one group is harmless; in two groups it is not
        let mut owners: HashMap<(&str, u16), u32> = HashMap::new();
        for node in &self.nodes {
            let owner = *owners
                .entry((node.host.as_str(), node.port))
                .or_insert(node.group_id);
            if owner != node.group_id {
                return Err(Error::InvalidTopology(format!(
                    "node {}:{} is listed in groups {} and {}",
                    node.host, node.port, owner, node.group_id
                )));
            }
        }
        if self.routing.strategy == RoutingStrategy::Ring && self.routing.virtual_nodes == 0 {
            return Err(Error::InvalidConfig(
                "routing.virtual_nodes must be > 0 for the ring strategy".into(),
            ));
        }
        self.pool.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [[nodes]]
        host = "10.0.0.1"
        port = 6301
        group_id = 1

        [[nodes]]
        host = "10.0.0.2"
        port = 6301
        group_id = 1
        timeout_ms = 500

        [pool]
        max_total = 16
        min_idle = 2

        [routing]
        strategy = "ring"
        virtual_nodes = 64
    "#;

    #[test]
    fn test_from_toml() {
        let cfg = ClusterConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[0].timeout_ms, 2_000);
        assert_eq!(cfg.nodes[1].timeout_ms, 500);
        assert_eq!(cfg.pool.max_total, 16);
        assert_eq!(cfg.pool.min_idle, 2);
        // Unset fields keep their defaults
        assert_eq!(cfg.pool.max_idle, 8);
        assert!(cfg.pool.lifo);
        assert_eq!(cfg.routing.strategy, RoutingStrategy::Ring);
        assert_eq!(cfg.routing.virtual_nodes, 64);
        assert_eq!(cfg.refresh_interval(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cfg = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(cfg.nodes[1].host, "10.0.0.2");
    }

    #[test]
    fn test_empty_nodes_rejected() {
        let err = ClusterConfig::new(vec![]).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(_)));
    }

    #[test]
    fn test_pool_validation() {
        let mut pool = PoolConfig::default();
        assert!(pool.validate().is_ok());

        pool.min_idle = 9;
        assert!(pool.validate().is_err());

        pool.min_idle = 0;
        pool.max_total = 4;
        assert!(pool.validate().is_err());

        pool.max_total = 0;
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let cfg = ClusterConfig::new(vec![NodeConfig::new("localhost", 0, 1)]);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_node_in_two_groups_rejected() {
        let cfg = ClusterConfig::new(vec![
            NodeConfig::new("10.0.0.1", 7000, 1),
            NodeConfig::new("10.0.0.2", 7000, 1),
            NodeConfig::new("10.0.0.1", 7000, 2),
        ]);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(ref m) if m.contains("groups 1 and 2")));

        // Same address twice in one group, or same host on another port, is fine
        let cfg = ClusterConfig::new(vec![
            NodeConfig::new("10.0.0.1", 7000, 1),
            NodeConfig::new("10.0.0.1", 7000, 1),
            NodeConfig::new("10.0.0.1", 7001, 2),
        ]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_node_timeout_bounds() {
        let node = NodeConfig::new("localhost", 6379, 1);
        let zero = ClusterConfig::new(vec![node.clone().with_timeout(Duration::ZERO)]);
        assert!(matches!(zero.validate(), Err(Error::InvalidConfig(_))));

        let mut huge = node.clone();
        huge.timeout_ms = u64::MAX;
        assert!(matches!(
            ClusterConfig::new(vec![huge]).validate(),
            Err(Error::InvalidConfig(_))
        ));

        let hour = node.with_timeout(Duration::from_secs(3_600));
        assert!(ClusterConfig::new(vec![hour]).validate().is_ok());
    }

    #[test]
    fn test_eviction_tuning_from_toml() {
        let toml = r#"
            [[nodes]]
            host = "10.0.0.1"
            port = 6301
            group_id = 1

            [pool]
            soft_min_evictable_idle_ms = 5000
            num_tests_per_eviction_run = 10
        "#;
        let cfg = ClusterConfig::from_toml(toml).unwrap();
        assert_eq!(
            cfg.pool.soft_min_evictable_idle(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(cfg.pool.num_tests_per_eviction_run, 10);
        assert_eq!(PoolConfig::default().soft_min_evictable_idle(), None);
    }
}
