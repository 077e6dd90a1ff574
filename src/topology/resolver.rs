//! Group resolver: one concurrent probing round over every group

use crate::common::{Error, Result};
use crate::topology::group::{elect, ReplicaSet, ResolvedGroup};
use crate::topology::node::NodeDescriptor;
use crate::topology::prober::{Role, RoleProber};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Slack on top of connect + read timeouts before a probe is abandoned
const PROBE_GRACE: Duration = Duration::from_millis(100);

pub struct GroupResolver {
    prober: Arc<dyn RoleProber>,
}

impl GroupResolver {
    pub fn new(prober: Arc<dyn RoleProber>) -> Self {
        Self { prober }
    }

    /// Probe every member of every group and elect each group's master
    ///
    /// Groups are probed in parallel, and so are the members of a group.
    /// A group is elected only once all of its probes have finished. One
    /// group being entirely down never affects the others; the round only
    /// fails if a probing task cannot complete at all.
    pub async fn resolve(
        &self,
        sets: &BTreeMap<u32, ReplicaSet>,
    ) -> Result<BTreeMap<u32, Arc<ResolvedGroup>>> {
        let mut tasks = JoinSet::new();

        for set in sets.values() {
            let set = set.clone();
            let prober = self.prober.clone();
            tasks.spawn(async move {
                let probes = set
                    .members
                    .iter()
                    .map(|node| probe_with_deadline(prober.as_ref(), node));
                let roles = join_all(probes).await;
                elect(&set, &roles)
            });
        }

        let mut resolved = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let group =
                joined.map_err(|e| Error::Internal(format!("probe task failed: {}", e)))?;

            match &group.master {
                Some(master) => tracing::info!(
                    "Group {} resolved: master={}, replicas={}, unreachable={}",
                    group.group_id,
                    master.addr(),
                    group.replicas.len(),
                    group.unreachable.len()
                ),
                None => tracing::warn!(
                    "Group {} has no master: replicas={}, unreachable={}",
                    group.group_id,
                    group.replicas.len(),
                    group.unreachable.len()
                ),
            }

            resolved.insert(group.group_id, Arc::new(group));
        }

        Ok(resolved)
    }
}

/// Bound a probe even if the prober ignores the node timeout
async fn probe_with_deadline(prober: &dyn RoleProber, node: &NodeDescriptor) -> Role {
    let deadline = probe_deadline(node.timeout());
    match tokio::time::timeout(deadline, prober.probe(node)).await {
        Ok(role) => role,
        Err(_) => Role::Unreachable {
            reason: format!("probe timed out after {:?}", deadline),
        },
    }
}

fn probe_deadline(timeout: Duration) -> Duration {
    timeout.saturating_mul(2).saturating_add(PROBE_GRACE)
}
