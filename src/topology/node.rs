//! Node descriptors

use crate::common::{Error, NodeConfig, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Network address of a store node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("missing port in {:?}", s)))?;
        let port = port
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid port in {:?}", s)))?;
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!("missing host in {:?}", s)));
        }
        Ok(Self::new(host, port))
    }
}

/// One reachable store endpoint and the group it belongs to
///
/// Immutable once built; cloned freely into groups and pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    addr: HostPort,
    group_id: u32,
    timeout: Duration,
}

impl NodeDescriptor {
    pub fn new(addr: HostPort, group_id: u32, timeout: Duration) -> Self {
        Self {
            addr,
            group_id,
            timeout,
        }
    }

    pub fn addr(&self) -> &HostPort {
        &self.addr
    }

    pub fn host(&self) -> &str {
        &self.addr.host
    }

    pub fn port(&self) -> u16 {
        self.addr.port
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    /// Bound on connecting and on each request/reply round trip
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl From<&NodeConfig> for NodeDescriptor {
    fn from(cfg: &NodeConfig) -> Self {
        Self::new(
            HostPort::new(cfg.host.clone(), cfg.port),
            cfg.group_id,
            Duration::from_millis(cfg.timeout_ms),
        )
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (group {})", self.addr, self.group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_parse() {
        let hp: HostPort = "10.0.0.1:6379".parse().unwrap();
        assert_eq!(hp, HostPort::new("10.0.0.1", 6379));
        assert_eq!(hp.to_string(), "10.0.0.1:6379");

        assert!("10.0.0.1".parse::<HostPort>().is_err());
        assert!(":6379".parse::<HostPort>().is_err());
        assert!("host:notaport".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_from_config() {
        let cfg = NodeConfig::new("cache-1", 6301, 3).with_timeout(Duration::from_millis(250));
        let node = NodeDescriptor::from(&cfg);
        assert_eq!(node.host(), "cache-1");
        assert_eq!(node.port(), 6301);
        assert_eq!(node.group_id(), 3);
        assert_eq!(node.timeout(), Duration::from_millis(250));
        assert_eq!(node.to_string(), "cache-1:6301 (group 3)");
    }
}
