//! Hashing utilities for shardkv
//!
//! - BLAKE3 as the uniform key hash
//! - Modulo sharding over a fixed group count
//! - Consistent hash ring for deployments that add or remove groups

use std::collections::BTreeMap;

/// 64-bit key hash: the first 8 bytes of BLAKE3(key), little-endian
pub fn key_hash(key: &[u8]) -> u64 {
    let hash = blake3::hash(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Compute the shard slot for a key (modulo sharding)
///
/// Returns `None` only when there are no shards.
pub fn shard_slot(key: &[u8], num_shards: usize) -> Option<usize> {
    if num_shards == 0 {
        return None;
    }
    Some((key_hash(key) % num_shards as u64) as usize)
}

/// Consistent hash ring mapping keys to group ids
///
/// Each group owns `virtual_nodes` points on the ring. A key belongs to the
/// group owning the first point at or after the key's hash, wrapping around.
/// Adding or removing one group only moves the keys adjacent to its points.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: BTreeMap<u64, u32>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            points: BTreeMap::new(),
            virtual_nodes,
        }
    }

    /// Build a ring from a set of group ids
    pub fn with_groups(group_ids: impl IntoIterator<Item = u32>, virtual_nodes: usize) -> Self {
        let mut ring = Self::new(virtual_nodes);
        for group_id in group_ids {
            ring.add_group(group_id);
        }
        ring
    }

    pub fn add_group(&mut self, group_id: u32) {
        for i in 0..self.virtual_nodes {
            let point = key_hash(format!("shard-{}-{}", group_id, i).as_bytes());
            // On a (vanishingly rare) point collision the lower group id wins,
            // so the ring does not depend on insertion order.
            self.points
                .entry(point)
                .and_modify(|owner| *owner = (*owner).min(group_id))
                .or_insert(group_id);
        }
    }

    pub fn remove_group(&mut self, group_id: u32) {
        self.points.retain(|_, owner| *owner != group_id);
    }

    /// Get the group responsible for a key
    pub fn get_group(&self, key: &[u8]) -> Option<u32> {
        let hash = key_hash(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, group_id)| *group_id)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }
}
