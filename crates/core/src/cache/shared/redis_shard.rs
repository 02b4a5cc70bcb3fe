use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, error};

use super::ShardClient;
use crate::cache::MAX_TTL;
use crate::types::{CacheError, Result};

const MAX_IDLE: Duration = Duration::from_secs(300);
const SCAN_BATCH: usize = 500;

/// Redis 连接池条目
struct PooledConnection {
    connection: MultiplexedConnection,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            last_used: Instant::now(),
        }
    }

    fn is_stale(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() > max_idle
    }
}

/// Redis 连接池
///
/// Connections that saw an error are dropped instead of being returned.
struct ConnectionPool {
    client: redis::Client,
    idle: Mutex<Vec<PooledConnection>>,
    max_idle: usize,
}

impl ConnectionPool {
    fn new(client: redis::Client, max_idle: usize) -> Self {
        Self {
            client,
            idle: Mutex::new(Vec::new()),
            max_idle: max_idle.max(1),
        }
    }

    async fn get(&self) -> Result<MultiplexedConnection> {
        let pooled = {
            let mut idle = self.idle.lock();
            idle.retain(|c| !c.is_stale(MAX_IDLE));
            idle.pop()
        };

        if let Some(pooled) = pooled {
            return Ok(pooled.connection);
        }

        // 创建新连接
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(format!("Failed to connect to Redis: {}", e)))
    }

    fn return_(&self, connection: MultiplexedConnection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(PooledConnection::new(connection));
        }
    }
}

/// Redis 分片客户端
pub struct RedisShard {
    name: String,
    url: String,
    pool: ConnectionPool,
}

impl std::fmt::Debug for RedisShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisShard")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RedisShard {
    /// 创建分片客户端（不立即连接）
    ///
    /// `addr` is either a full `redis://` URL or a bare `host:port`.
    pub fn open(name: impl Into<String>, addr: &str, pool_size: usize) -> Result<Self> {
        let name = name.into();
        let url = normalize_url(addr);
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            CacheError::Configuration(format!("invalid Redis address for shard '{}': {}", name, e))
        })?;

        debug!("RedisShard '{}' configured for {}, pool_size={}", name, url, pool_size);

        Ok(Self {
            name,
            url,
            pool: ConnectionPool::new(client, pool_size),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs `op` on a pooled connection; the connection goes back to the
    /// pool only when the command succeeded.
    async fn with_conn<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = (MultiplexedConnection, redis::RedisResult<T>)>,
    {
        let conn = self.pool.get().await?;
        let (conn, result) = op(conn).await;
        match result {
            Ok(value) => {
                self.pool.return_(conn);
                Ok(value)
            }
            Err(e) => {
                error!("Redis {} error on shard '{}': {}", what, self.name, e);
                Err(CacheError::Backend(format!(
                    "Redis {} failed on shard '{}': {}",
                    what, self.name, e
                )))
            }
        }
    }
}

#[async_trait]
impl ShardClient for RedisShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let key = key.to_string();
        let data: Option<Vec<u8>> = self
            .with_conn("get", |mut conn| async move {
                let result = conn.get(&key).await;
                (conn, result)
            })
            .await?;
        Ok(data.map(Bytes::from))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys = keys.to_vec();
        let data: Vec<Option<Vec<u8>>> = self
            .with_conn("mget", |mut conn| async move {
                let result = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await;
                (conn, result)
            })
            .await?;
        Ok(data.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let key = key.to_string();
        let millis = ttl.min(MAX_TTL).as_millis().max(1) as u64;
        self.with_conn("set", |mut conn| async move {
            let result: redis::RedisResult<()> = conn.pset_ex(&key, value.to_vec(), millis).await;
            (conn, result)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn("delete", |mut conn| async move {
            let result: redis::RedisResult<usize> = conn.del(&key).await;
            (conn, result.map(|_| ()))
        })
        .await
    }

    async fn clear_prefix(&self, pattern: &str) -> Result<usize> {
        let glob = format!("{}*", escape_glob(pattern));
        self.with_conn("scan", |mut conn| async move {
            let result = scan_and_delete(&mut conn, &glob).await;
            (conn, result)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let pong: String = self
            .with_conn("ping", |mut conn| async move {
                let result = redis::cmd("PING").query_async(&mut conn).await;
                (conn, result)
            })
            .await?;

        if pong != "PONG" {
            return Err(CacheError::Backend(format!(
                "unexpected PING reply from shard '{}': {}",
                self.name, pong
            )));
        }
        Ok(())
    }
}

async fn scan_and_delete(conn: &mut MultiplexedConnection, glob: &str) -> redis::RedisResult<usize> {
    let mut cursor: u64 = 0;
    let mut removed = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(glob)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;

        if !keys.is_empty() {
            let n: usize = redis::cmd("DEL").arg(&keys).query_async(conn).await?;
            removed += n;
        }

        if next == 0 {
            return Ok(removed);
        }
        cursor = next;
    }
}

fn normalize_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
