//! Replication role probing
//!
//! A probe opens one transient connection to a node, asks for
//! `INFO replication` and classifies the node from the `role:` line. Probes
//! never fail: every network or protocol problem becomes [`Role::Unreachable`].

use crate::common::{Error, Result};
use crate::pool::Connector;
use crate::topology::node::{HostPort, NodeDescriptor};
use async_trait::async_trait;
use redis::InfoDict;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Replication role reported by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Role {
    Master,
    /// `of` is absent when the replica has not reported its master yet
    Replica { of: Option<HostPort> },
    Unreachable { reason: String },
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self, Role::Unreachable { .. })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica { of: Some(master) } => write!(f, "replica of {}", master),
            Role::Replica { of: None } => write!(f, "replica"),
            Role::Unreachable { reason } => write!(f, "unreachable ({})", reason),
        }
    }
}

/// Classifies a node's current replication role
#[async_trait]
pub trait RoleProber: Send + Sync + 'static {
    async fn probe(&self, node: &NodeDescriptor) -> Role;
}

/// Prober speaking `INFO replication` over a transient connection
pub struct InfoProber {
    connector: Arc<dyn Connector>,
}

impl InfoProber {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    async fn try_probe(&self, node: &NodeDescriptor) -> Result<Role> {
        // Transient connection, closed when the probe returns
        let mut conn = self.connector.connect(node).await?;
        let mut cmd = redis::cmd("INFO");
        cmd.arg("replication");
        let reply = conn.execute(&cmd).await?;
        let info: InfoDict = redis::from_redis_value(&reply)?;
        role_from_info(&info)
    }
}

#[async_trait]
impl RoleProber for InfoProber {
    async fn probe(&self, node: &NodeDescriptor) -> Role {
        match self.try_probe(node).await {
            Ok(role) => {
                tracing::debug!("Probed {}: {}", node.addr(), role);
                role
            }
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", node.addr(), e);
                Role::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Extract the replication role from line-oriented `INFO` text
///
/// Accepts `role:master`, `role:slave` and `role:replica`. For replicas the
/// `master_host` / `master_port` fields name the upstream node.
pub fn parse_replication_info(text: &str) -> Result<Role> {
    role_from_info(&InfoDict::new(text))
}

fn role_from_info(info: &InfoDict) -> Result<Role> {
    let role: Option<String> = info.get("role");
    match role.as_deref().map(str::trim) {
        Some("master") => Ok(Role::Master),
        Some("slave") | Some("replica") => {
            let host: Option<String> = info.get("master_host");
            let port: Option<u16> = info.get("master_port");
            let of = match (host, port) {
                (Some(host), Some(port)) if !host.trim().is_empty() => {
                    Some(HostPort::new(host.trim(), port))
                }
                _ => None,
            };
            Ok(Role::Replica { of })
        }
        Some(other) => Err(Error::Protocol(format!("unknown role {:?}", other))),
        None => Err(Error::Protocol("no role field in INFO reply".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_master() {
        let text = "# Replication\r\nrole:master\r\nconnected_slaves:1\r\n\
                    slave0:ip=10.0.0.2,port=6301,state=online,offset=42,lag=0\r\n";
        assert_eq!(parse_replication_info(text).unwrap(), Role::Master);
    }

    #[test]
    fn test_parse_slave() {
        let text = "# Replication\r\nrole:slave\r\nmaster_host:10.0.0.1\r\n\
                    master_port:6301\r\nmaster_link_status:up\r\n";
        assert_eq!(
            parse_replication_info(text).unwrap(),
            Role::Replica {
                of: Some(HostPort::new("10.0.0.1", 6301))
            }
        );
    }

    #[test]
    fn test_parse_replica_without_master() {
        let text = "role:replica\nmaster_link_status:down\n";
        assert_eq!(
            parse_replication_info(text).unwrap(),
            Role::Replica { of: None }
        );
    }

    #[test]
    fn test_parse_missing_or_unknown_role() {
        assert!(parse_replication_info("connected_slaves:0\r\n").is_err());
        assert!(parse_replication_info("role:sentinel\r\n").is_err());
        assert!(parse_replication_info("").is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(
            Role::Replica {
                of: Some(HostPort::new("a", 1))
            }
            .to_string(),
            "replica of a:1"
        );
        assert!(!Role::Unreachable {
            reason: "refused".into()
        }
        .is_reachable());
    }
}
