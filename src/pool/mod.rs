//! Connection management: transports, per-node pools, the pool registry

pub mod connection;
pub mod connection_pool;
pub mod registry;

pub use connection::{Connection, Connector, RedisConnection, RedisConnector};
pub use connection_pool::{ConnectionPool, PooledConnection};
pub use registry::PoolRegistry;
