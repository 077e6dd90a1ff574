//! Replica-set grouping and per-group master election

use crate::topology::node::{HostPort, NodeDescriptor};
use crate::topology::prober::Role;
use serde::Serialize;
use std::collections::BTreeMap;

/// Raw group: every configured member of one group, in configuration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    pub group_id: u32,
    pub members: Vec<NodeDescriptor>,
}

/// Partition descriptors by group id
///
/// Pure data partitioning. Member order within each group follows the input,
/// which is what makes split-brain election deterministic. Duplicate
/// addresses are kept (and probed twice).
pub fn group(nodes: &[NodeDescriptor]) -> BTreeMap<u32, ReplicaSet> {
    let mut groups: BTreeMap<u32, ReplicaSet> = BTreeMap::new();
    for node in nodes {
        groups
            .entry(node.group_id())
            .or_insert_with(|| ReplicaSet {
                group_id: node.group_id(),
                members: Vec::new(),
            })
            .members
            .push(node.clone());
    }
    groups
}

/// A group after election
///
/// Each reachable address appears exactly once, as master or as a replica.
/// Never mutated after construction; a refresh produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedGroup {
    pub group_id: u32,
    pub master: Option<NodeDescriptor>,
    pub replicas: Vec<NodeDescriptor>,
    /// Members excluded from this round; probed again on the next refresh
    pub unreachable: Vec<NodeDescriptor>,
}

impl ResolvedGroup {
    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }

    pub fn master_addr(&self) -> Option<&HostPort> {
        self.master.as_ref().map(|m| m.addr())
    }

    /// At least one member answered the probe
    pub fn is_reachable(&self) -> bool {
        self.master.is_some() || !self.replicas.is_empty()
    }
}

/// Elect a master from completed probe results
///
/// `roles[i]` is the probe result of `set.members[i]`.
///
/// 1. The first member reporting master, in configuration order, wins. When
///    several members claim the role (split brain or a failover in flight)
///    this is deterministic but not necessarily the right node.
/// 2. Every other reachable member becomes a replica.
/// 3. No master reported: the group resolves without one.
/// 4. Unreachable members are left out of both sets.
pub fn elect(set: &ReplicaSet, roles: &[Role]) -> ResolvedGroup {
    debug_assert_eq!(set.members.len(), roles.len());

    let master = set
        .members
        .iter()
        .zip(roles)
        .find(|(_, role)| role.is_master())
        .map(|(node, _)| node.clone());

    let claimants: Vec<String> = set
        .members
        .iter()
        .zip(roles)
        .filter(|(_, role)| role.is_master())
        .map(|(node, _)| node.addr().to_string())
        .collect();
    let distinct_claimants = {
        let mut c = claimants.clone();
        c.sort();
        c.dedup();
        c.len()
    };
    if distinct_claimants > 1 {
        tracing::warn!(
            "Group {}: {} nodes claim the master role ({}), electing {}",
            set.group_id,
            distinct_claimants,
            claimants.join(", "),
            claimants[0]
        );
    }

    let mut replicas: Vec<NodeDescriptor> = Vec::new();
    let mut unreachable: Vec<NodeDescriptor> = Vec::new();
    let master_addr = master.as_ref().map(|m| m.addr().clone());

    for (node, role) in set.members.iter().zip(roles) {
        if Some(node.addr()) == master_addr.as_ref() {
            continue;
        }
        match role {
            Role::Unreachable { reason } => {
                tracing::debug!("Group {}: {} unreachable: {}", set.group_id, node.addr(), reason);
                if !unreachable.iter().any(|n| n.addr() == node.addr()) {
                    unreachable.push(node.clone());
                }
            }
            Role::Master | Role::Replica { .. } => {
                if let Role::Replica { of: Some(upstream) } = role {
                    if !set.members.iter().any(|m| m.addr() == upstream) {
                        tracing::warn!(
                            "Group {}: replica {} follows {}, which is not a member of the group",
                            set.group_id,
                            node.addr(),
                            upstream
                        );
                    }
                }
                if !replicas.iter().any(|n| n.addr() == node.addr()) {
                    replicas.push(node.clone());
                }
            }
        }
    }

    // A duplicate entry may have answered where its twin did not
    unreachable.retain(|n| !replicas.iter().any(|r| r.addr() == n.addr()));

    ResolvedGroup {
        group_id: set.group_id,
        master,
        replicas,
        unreachable,
    }
}
