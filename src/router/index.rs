//! Immutable shard index: one routing snapshot

use crate::common::{shard_slot, Error, HashRing, Result, RoutingConfig, RoutingStrategy};
use crate::pool::ConnectionPool;
use crate::topology::ResolvedGroup;
use std::collections::HashMap;
use std::sync::Arc;

/// One group's position in the index
#[derive(Debug, Clone)]
pub struct ShardSlot {
    pub group: Arc<ResolvedGroup>,
    /// Pool of the elected master; `None` when the group has no master
    pub pool: Option<ConnectionPool>,
}

/// Key → group mapping for one topology generation
///
/// Slots are ordered by group id, so modulo routing depends only on the set
/// of configured groups, never on probe completion order.
#[derive(Debug)]
pub struct ShardIndex {
    generation: u64,
    slots: Vec<ShardSlot>,
    ring: Option<HashRing>,
    positions: HashMap<u32, usize>,
}

impl ShardIndex {
    pub fn new(generation: u64, mut slots: Vec<ShardSlot>, routing: &RoutingConfig) -> Result<Self> {
        if slots.is_empty() {
            return Err(Error::InvalidTopology("no groups to route to".into()));
        }
        slots.sort_by_key(|slot| slot.group.group_id);

        let positions: HashMap<u32, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.group.group_id, i))
            .collect();
        if positions.len() != slots.len() {
            return Err(Error::InvalidTopology("duplicate group id in index".into()));
        }

        let ring = match routing.strategy {
            RoutingStrategy::Modulo => None,
            RoutingStrategy::Ring => Some(HashRing::with_groups(
                slots.iter().map(|slot| slot.group.group_id),
                routing.virtual_nodes,
            )),
        };

        Ok(Self {
            generation,
            slots,
            ring,
            positions,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ShardSlot] {
        &self.slots
    }

    /// Resolved groups in group id order
    pub fn groups(&self) -> impl Iterator<Item = &Arc<ResolvedGroup>> {
        self.slots.iter().map(|slot| &slot.group)
    }

    pub fn slot_for(&self, key: &[u8]) -> Option<&ShardSlot> {
        let position = match &self.ring {
            Some(ring) => ring
                .get_group(key)
                .and_then(|gid| self.positions.get(&gid).copied()),
            None => shard_slot(key, self.slots.len()),
        }?;
        self.slots.get(position)
    }

    /// Group that owns `key` in this snapshot
    pub fn group_for(&self, key: &[u8]) -> Option<&Arc<ResolvedGroup>> {
        self.slot_for(key).map(|slot| &slot.group)
    }

    /// Pool of the master owning `key`
    pub fn route(&self, key: &[u8]) -> Result<ConnectionPool> {
        let slot = self
            .slot_for(key)
            .ok_or_else(|| Error::InvalidTopology("empty shard index".into()))?;
        slot.pool.clone().ok_or(Error::NoMasterElected {
            group_id: slot.group.group_id,
        })
    }
}
