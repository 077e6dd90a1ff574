//! Key routing over the resolved topology

pub mod index;
pub mod shard_router;

pub use index::{ShardIndex, ShardSlot};
pub use shard_router::ShardRouter;
