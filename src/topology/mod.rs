//! Topology discovery
//!
//! Nodes are grouped by configured group id, every member is probed for its
//! replication role, and each group elects at most one master.

pub mod group;
pub mod node;
pub mod prober;
pub mod resolver;

pub use group::{elect, group, ReplicaSet, ResolvedGroup};
pub use node::{HostPort, NodeDescriptor};
pub use prober::{parse_replication_info, InfoProber, Role, RoleProber};
pub use resolver::GroupResolver;
