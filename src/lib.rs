//! # shardkv
//!
//! Client-side sharding over master/replica key-value store groups:
//! - Nodes are declared with a group id; each group is one replica set
//! - Every member is probed with `INFO replication` and each group elects
//!   at most one master
//! - Keys are routed to a group by hash (modulo or consistent ring) and
//!   served by a bounded connection pool to that group's master
//! - The topology can be refreshed at runtime without blocking routing
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  config ──► group() ──► GroupResolver ──► ShardIndex (Arc snapshot)
//!                          │  probes every      │
//!                          │  member in         ▼
//!                          │  parallel     ConnectionPool per master
//!                          ▼                    │
//!                     ResolvedGroup        ShardedClient::execute
//!                     (master/replicas)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> shardkv::Result<()> {
//! use shardkv::{ClusterConfig, ShardedClient};
//!
//! let config = ClusterConfig::load("cluster.toml")?;
//! let client = ShardedClient::connect(config).await?;
//! client.set("user:42", "ada").await?;
//! let name = client.get("user:42").await?;
//! # let _ = name;
//! client.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ### CLI
//! ```bash
//! shardkv --config cluster.toml topology
//! shardkv --config cluster.toml route user:42
//! shardkv --config cluster.toml watch --interval 5s
//! ```

pub mod client;
pub mod common;
pub mod pool;
pub mod router;
pub mod topology;

// Re-export commonly used types
pub use client::ShardedClient;
pub use common::{ClusterConfig, Error, NodeConfig, PoolConfig, Result};
pub use pool::ConnectionPool;
pub use redis::{cmd, Cmd, Value};
pub use router::{ShardIndex, ShardRouter};
pub use topology::{HostPort, NodeDescriptor, ResolvedGroup, Role};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
