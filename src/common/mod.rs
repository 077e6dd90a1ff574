//! Common utilities and types shared across shardkv

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod utils;

pub use config::{ClusterConfig, NodeConfig, PoolConfig, RoutingConfig, RoutingStrategy};
pub use error::{Error, Result};
pub use hash::{key_hash, shard_slot, HashRing};
pub use metrics::{Counter, Gauge, PoolMetrics, PoolStats};
pub use utils::{parse_duration, retry_with_backoff};
