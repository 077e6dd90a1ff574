//! Sharded command client
//!
//! Thin forwarding layer: every call routes by key, borrows a connection
//! from the owning master's pool, runs one command and returns the
//! connection. No topology logic lives here.

use crate::common::{codec, retry_with_backoff, ClusterConfig, Result};
use crate::router::ShardRouter;
use bytes::Bytes;
use redis::{Cmd, FromRedisValue, Value};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(50);

pub struct ShardedClient {
    router: Arc<ShardRouter>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShardedClient {
    /// Resolve the topology and start periodic refresh if configured
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let router = Arc::new(ShardRouter::initialize(config).await?);
        Ok(Self::from_router(router))
    }

    /// Wrap an initialized router
    ///
    /// Starts the background refresh when `refresh_interval_ms > 0`.
    pub fn from_router(router: Arc<ShardRouter>) -> Self {
        let refresh_task = router.config().refresh_interval().map(|interval| {
            tracing::info!("Refreshing topology every {:?}", interval);
            router.spawn_refresh(interval)
        });
        Self {
            router,
            refresh_task: Mutex::new(refresh_task),
        }
    }

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }

    /// Run `cmd` on the master owning `key`
    ///
    /// The connection goes back to its pool as healthy unless the failure
    /// was at the transport level; error replies leave it usable.
    pub async fn execute(&self, key: &[u8], cmd: &Cmd) -> Result<Value> {
        let pool = self.router.route(key)?;
        let mut conn = pool.borrow().await?;
        match conn.execute(cmd).await {
            Ok(reply) => {
                conn.give_back(true).await;
                Ok(reply)
            }
            Err(e) => {
                let healthy = !e.is_connection_fault();
                if !healthy {
                    tracing::debug!("Discarding connection to {}: {}", conn.addr(), e);
                }
                conn.give_back(healthy).await;
                Err(e)
            }
        }
    }

    /// [`execute`](Self::execute), converting the reply to `T`
    pub async fn query<T: FromRedisValue>(&self, key: &[u8], cmd: &Cmd) -> Result<T> {
        let reply = self.execute(key, cmd).await?;
        Ok(redis::from_redis_value(&reply)?)
    }

    /// [`execute`](Self::execute) with exponential backoff on retryable errors
    ///
    /// A pool retired by a refresh is retryable, so the next attempt routes
    /// to the current master.
    pub async fn execute_with_retry(
        &self,
        key: &[u8],
        cmd: &Cmd,
        max_attempts: usize,
    ) -> Result<Value> {
        retry_with_backoff(
            || self.execute(key, cmd),
            max_attempts.max(1),
            RETRY_INITIAL_DELAY,
        )
        .await
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        let value: Option<Vec<u8>> = self.query(key, &cmd).await?;
        Ok(value.map(Bytes::from))
    }

    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        self.query(key, &cmd).await
    }

    /// SET with an expiry, rounded up to whole seconds
    pub async fn set_ex(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> Result<()> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(ttl_secs(ttl)).arg(value.as_ref());
        self.query(key, &cmd).await
    }

    /// Returns whether the key existed
    pub async fn del(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.query(key, &cmd).await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let found: i64 = self.query(key, &cmd).await?;
        Ok(found > 0)
    }

    /// Returns false when the key does not exist
    pub async fn expire(&self, key: impl AsRef<[u8]>, ttl: Duration) -> Result<bool> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl_secs(ttl));
        let set: i64 = self.query(key, &cmd).await?;
        Ok(set == 1)
    }

    /// Remaining time to live; `None` for a missing key or one without expiry
    pub async fn ttl(&self, key: impl AsRef<[u8]>) -> Result<Option<Duration>> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("TTL");
        cmd.arg(key);
        let secs: i64 = self.query(key, &cmd).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    pub async fn incr_by(&self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(delta);
        self.query(key, &cmd).await
    }

    /// Echo `message` from the master owning it
    pub async fn echo(&self, message: impl AsRef<[u8]>) -> Result<Bytes> {
        let message = message.as_ref();
        let mut cmd = redis::cmd("ECHO");
        cmd.arg(message);
        let reply: Vec<u8> = self.query(message, &cmd).await?;
        Ok(Bytes::from(reply))
    }

    pub async fn hget(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
    ) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("HGET");
        cmd.arg(key).arg(field.as_ref());
        let value: Option<Vec<u8>> = self.query(key, &cmd).await?;
        Ok(value.map(Bytes::from))
    }

    /// Returns true when the field was newly created
    pub async fn hset(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<bool> {
        let key = key.as_ref();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key).arg(field.as_ref()).arg(value.as_ref());
        let created: i64 = self.query(key, &cmd).await?;
        Ok(created == 1)
    }

    /// Store a value in the versioned binary encoding
    pub async fn set_value<T: Serialize>(&self, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        let encoded = codec::encode(value)?;
        self.set(key, encoded).await
    }

    pub async fn get_value<T: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stop background refresh and close every pool
    pub fn shutdown(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.router.shutdown();
    }
}

impl Drop for ShardedClient {
    fn drop(&mut self) {
        let task = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, NodeConfig};
    use crate::pool::{Connection, Connector};
    use crate::topology::{NodeDescriptor, Role, RoleProber};
    use async_trait::async_trait;
    use redis::Arg;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

    /// In-memory node: GET/SET/DEL/INCRBY plus a switch that drops the link
    struct MemoryConnection {
        store: Store,
        broken: Arc<AtomicBool>,
    }

    fn args(cmd: &Cmd) -> Vec<Vec<u8>> {
        cmd.args_iter()
            .filter_map(|arg| match arg {
                Arg::Simple(bytes) => Some(bytes.to_vec()),
                Arg::Cursor => None,
            })
            .collect()
    }

    #[async_trait]
    impl Connection for MemoryConnection {
        async fn execute(&mut self, cmd: &Cmd) -> Result<Value> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::ConnectionFailed("link down".into()));
            }
            let args = args(cmd);
            let name = String::from_utf8_lossy(&args[0]).to_uppercase();
            let mut store = self.store.lock().unwrap();
            let reply = match name.as_str() {
                "PING" => Value::SimpleString("PONG".into()),
                "GET" => store
                    .get(&args[1])
                    .cloned()
                    .map(Value::BulkString)
                    .unwrap_or(Value::Nil),
                "SET" => {
                    store.insert(args[1].clone(), args[2].clone());
                    Value::Okay
                }
                "DEL" => Value::Int(store.remove(&args[1]).is_some() as i64),
                "INCRBY" => {
                    let current: i64 = store
                        .get(&args[1])
                        .map(|v| String::from_utf8_lossy(v).parse().unwrap())
                        .unwrap_or(0);
                    let delta: i64 = String::from_utf8_lossy(&args[2]).parse().unwrap();
                    let next = current + delta;
                    store.insert(args[1].clone(), next.to_string().into_bytes());
                    Value::Int(next)
                }
                other => return Err(Error::Server(format!("ERR unknown command '{}'", other))),
            };
            Ok(reply)
        }
    }

    #[derive(Default)]
    struct MemoryConnector {
        store: Store,
        broken: Arc<AtomicBool>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, _node: &NodeDescriptor) -> Result<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection {
                store: self.store.clone(),
                broken: self.broken.clone(),
            }))
        }
    }

    struct AllMasters;

    #[async_trait]
    impl RoleProber for AllMasters {
        async fn probe(&self, _node: &NodeDescriptor) -> Role {
            Role::Master
        }
    }

    async fn client(connector: Arc<MemoryConnector>) -> ShardedClient {
        let mut config = ClusterConfig::new(vec![
            NodeConfig::new("a", 6301, 1),
            NodeConfig::new("b", 6302, 2),
        ]);
        config.pool.eviction_interval_ms = 0;
        let router = ShardRouter::initialize_with(config, Arc::new(AllMasters), connector)
            .await
            .unwrap();
        ShardedClient::from_router(Arc::new(router))
    }

    #[tokio::test]
    async fn test_helpers() {
        let client = client(Arc::new(MemoryConnector::default())).await;

        assert_eq!(client.get("missing").await.unwrap(), None);
        client.set("greeting", "hello").await.unwrap();
        assert_eq!(
            client.get("greeting").await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(client.incr_by("counter", 5).await.unwrap(), 5);
        assert_eq!(client.incr_by("counter", -2).await.unwrap(), 3);
        assert!(client.del("greeting").await.unwrap());
        assert!(!client.del("greeting").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let connector = Arc::new(MemoryConnector::default());
        let client = client(connector.clone()).await;

        let err = client
            .execute(b"k", redis::cmd("NOPE").arg("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(_)));
        client.set("k", "v").await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_discards_connection() {
        let connector = Arc::new(MemoryConnector::default());
        let client = client(connector.clone()).await;

        connector.broken.store(true, Ordering::SeqCst);
        assert!(client.get("k").await.is_err());
        connector.broken.store(false, Ordering::SeqCst);
        assert_eq!(client.get("k").await.unwrap(), None);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrong_reply_type_is_protocol_error() {
        let client = client(Arc::new(MemoryConnector::default())).await;
        client.set("name", "ada").await.unwrap();

        let err = client
            .query::<i64>(b"name", redis::cmd("GET").arg("name"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_typed_values() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Profile {
            name: String,
            visits: u32,
        }

        let client = client(Arc::new(MemoryConnector::default())).await;
        let profile = Profile {
            name: "ada".into(),
            visits: 3,
        };
        client.set_value("profile:1", &profile).await.unwrap();
        assert_eq!(
            client.get_value::<Profile>("profile:1").await.unwrap(),
            Some(profile)
        );
        assert_eq!(client.get_value::<Profile>("profile:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_commands() {
        let client = client(Arc::new(MemoryConnector::default())).await;
        client.shutdown();
        assert!(matches!(client.get("k").await, Err(Error::Shutdown)));
    }

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_secs(10)), 10);
        assert_eq!(ttl_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
