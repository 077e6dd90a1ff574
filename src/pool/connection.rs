//! Transport connections
//!
//! The pool only knows the [`Connection`] and [`Connector`] traits. The
//! default implementation wraps a `redis` multiplexed connection used by one
//! borrower at a time.

use crate::common::{Error, Result};
use crate::topology::NodeDescriptor;
use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::{Cmd, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, Value};
use std::time::Duration;

/// A live, exclusive connection to one node
#[async_trait]
pub trait Connection: Send + 'static {
    /// Run one command and wait for its reply
    ///
    /// Error replies surface as [`Error::Server`].
    async fn execute(&mut self, cmd: &Cmd) -> Result<Value>;

    /// Lightweight liveness check used for pool validation
    async fn ping(&mut self) -> bool {
        matches!(
            self.execute(&redis::cmd("PING")).await,
            Ok(Value::SimpleString(ref s)) if s == "PONG"
        )
    }
}

/// Opens connections to a node
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, node: &NodeDescriptor) -> Result<Box<dyn Connection>>;
}

/// One `redis` connection with a per-request timeout
pub struct RedisConnection {
    conn: MultiplexedConnection,
    timeout: Duration,
    peer: String,
}

impl RedisConnection {
    /// Connect, bounded by the node's timeout
    pub async fn connect(node: &NodeDescriptor) -> Result<Self> {
        let peer = node.addr().to_string();
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(node.host().to_string(), node.port()),
            redis: RedisConnectionInfo::default(),
        };
        let client = redis::Client::open(info)?;

        let connect = client.get_multiplexed_async_connection();
        let conn = match tokio::time::timeout(node.timeout(), connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(Error::ConnectionFailed(format!("{}: {}", peer, e)));
            }
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "connect to {} after {:?}",
                    peer,
                    node.timeout()
                )));
            }
        };

        Ok(Self {
            conn,
            timeout: node.timeout(),
            peer,
        })
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn execute(&mut self, cmd: &Cmd) -> Result<Value> {
        let timeout = self.timeout;
        let reply = match tokio::time::timeout(timeout, self.conn.req_packed_command(cmd)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "request to {} after {:?}",
                    self.peer, timeout
                )))
            }
        };
        match reply {
            Value::ServerError(err) => Err(RedisError::from(err).into()),
            other => Ok(other),
        }
    }
}

/// Default connector: one `redis` connection per pooled slot
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, node: &NodeDescriptor) -> Result<Box<dyn Connection>> {
        let conn = RedisConnection::connect(node).await?;
        tracing::debug!("Connected to {}", node.addr());
        Ok(Box::new(conn))
    }
}
