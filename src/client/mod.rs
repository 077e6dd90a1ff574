//! Client-facing command executor

pub mod sharded;

pub use sharded::ShardedClient;
