// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod breaker;
mod memory_shard;
mod redis_shard;
mod ring;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use memory_shard::MemoryShard;
pub use redis_shard::RedisShard;
pub use ring::{HashRing, DEFAULT_REPLICAS};

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{prefix_pattern, CacheKey};
use crate::config::SharedCacheConfig;
use crate::types::{CacheError, Result};

/// One backend node of the shared tier.
///
/// Keys handed to a shard are physical keys (namespace already applied).
/// Every error is a connectivity/protocol failure; a missing key is
/// `Ok(None)`, never an error.
#[async_trait]
pub trait ShardClient: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// One round trip for all `keys`; the result is aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes every key starting with `pattern`. Returns the number removed.
    async fn clear_prefix(&self, pattern: &str) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardHealth {
    pub name: String,
    pub healthy: bool,
    pub breaker: CircuitBreakerState,
    pub error: Option<String>,
}

struct ShardSlot {
    client: Arc<dyn ShardClient>,
    breaker: CircuitBreaker,
}

/// Shared tier: a ring of independently addressed shards.
///
/// The ring and the shard list are fixed at construction; all methods take
/// `&self` and are safe to call from any number of tasks.
pub struct SharedCache {
    ring: HashRing,
    shards: Vec<ShardSlot>,
    namespace: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache")
            .field("shards", &self.ring.nodes())
            .field("namespace", &self.namespace)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl SharedCache {
    pub fn new(shards: Vec<Arc<dyn ShardClient>>, config: &SharedCacheConfig) -> Result<Self> {
        if shards.is_empty() {
            return Err(CacheError::Configuration(
                "shared cache needs at least one shard".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for shard in &shards {
            if !seen.insert(shard.name().to_string()) {
                return Err(CacheError::Configuration(format!(
                    "duplicate shard name '{}'",
                    shard.name()
                )));
            }
        }

        let names = shards.iter().map(|s| s.name().to_string()).collect();
        let ring = HashRing::new(names, config.replicas);
        let shards = shards
            .into_iter()
            .map(|client| ShardSlot {
                breaker: CircuitBreaker::new(client.name(), config.breaker.clone()),
                client,
            })
            .collect();

        debug!(
            "SharedCache built with {} shards, namespace '{}'",
            ring.len(),
            config.namespace
        );

        Ok(Self {
            ring,
            shards,
            namespace: config.namespace.clone(),
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        })
    }

    /// Builds a Redis-backed shared tier from the configured shard map.
    /// Connections are opened lazily, so an unreachable shard does not
    /// prevent startup.
    pub fn connect(config: &SharedCacheConfig) -> Result<Self> {
        let shards = config
            .shards
            .iter()
            .map(|(name, addr)| {
                RedisShard::open(name, addr, config.pool_size)
                    .map(|shard| Arc::new(shard) as Arc<dyn ShardClient>)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(shards, config)
    }

    pub fn physical_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.namespace, key)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the shard owning `key`.
    pub fn locate(&self, key: &CacheKey) -> &str {
        let idx = self.shard_index(&self.physical_key(key));
        self.shards[idx].client.name()
    }

    pub fn shard_names(&self) -> &[String] {
        self.ring.nodes()
    }

    fn shard_index(&self, physical: &str) -> usize {
        // the ring is never empty, see `new`
        self.ring.locate(physical).unwrap_or(0)
    }

    async fn call<T, F>(&self, idx: usize, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.op_timeout;
        self.shards[idx]
            .breaker
            .execute(async move { tokio::time::timeout(timeout, operation).await? })
            .await
    }

    /// `Ok(None)` is a real miss; `Err` means the shard's answer is unknown.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let physical = self.physical_key(key);
        let idx = self.shard_index(&physical);
        let client = self.shards[idx].client.clone();
        self.call(idx, async move { client.get(&physical).await }).await
    }

    pub async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }

        let physical = self.physical_key(key);
        let idx = self.shard_index(&physical);
        let client = self.shards[idx].client.clone();
        self.call(idx, async move { client.set(&physical, value, ttl).await })
            .await
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        let physical = self.physical_key(key);
        let idx = self.shard_index(&physical);
        let client = self.shards[idx].client.clone();
        self.call(idx, async move { client.delete(&physical).await }).await
    }

    /// Batched lookup, one request per shard, shards queried concurrently.
    ///
    /// The result is aligned with `keys`. A failing shard only turns its own
    /// keys into errors.
    pub async fn mget(&self, keys: &[CacheKey]) -> Vec<Result<Option<Bytes>>> {
        let mut groups: BTreeMap<usize, (Vec<usize>, Vec<String>)> = BTreeMap::new();
        for (pos, key) in keys.iter().enumerate() {
            let physical = self.physical_key(key);
            let group = groups.entry(self.shard_index(&physical)).or_default();
            group.0.push(pos);
            group.1.push(physical);
        }

        let batches = groups.into_iter().map(|(idx, (positions, physical))| async move {
            let client = self.shards[idx].client.clone();
            let result = self.call(idx, async { client.mget(&physical).await }).await;
            (idx, positions, result)
        });

        let mut out: Vec<Result<Option<Bytes>>> = (0..keys.len()).map(|_| Ok(None)).collect();
        for (idx, positions, result) in join_all(batches).await {
            match result {
                Ok(values) if values.len() == positions.len() => {
                    for (pos, value) in positions.into_iter().zip(values) {
                        out[pos] = Ok(value);
                    }
                }
                Ok(values) => {
                    let err = CacheError::Backend(format!(
                        "shard '{}' answered {} values for {} keys",
                        self.shards[idx].client.name(),
                        values.len(),
                        positions.len()
                    ));
                    for pos in positions {
                        out[pos] = Err(err.clone());
                    }
                }
                Err(err) => {
                    warn!(
                        "Shared mget failed on shard '{}' for {} keys: {}",
                        self.shards[idx].client.name(),
                        positions.len(),
                        err
                    );
                    for pos in positions {
                        out[pos] = Err(err.clone());
                    }
                }
            }
        }
        out
    }

    /// Removes every key of `prefix` on every shard. All shards are tried;
    /// the first failure is returned after the others finished.
    pub async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{}{}", self.namespace, prefix_pattern(prefix));

        let calls = (0..self.shards.len()).map(|idx| {
            let client = self.shards[idx].client.clone();
            let pattern = pattern.clone();
            async move { self.call(idx, async move { client.clear_prefix(&pattern).await }).await }
        });

        let mut removed = 0;
        let mut first_err = None;
        for (idx, result) in join_all(calls).await.into_iter().enumerate() {
            match result {
                Ok(n) => removed += n,
                Err(e) => {
                    warn!(
                        "Failed to clear prefix '{}' on shard '{}': {}",
                        prefix,
                        self.shards[idx].client.name(),
                        e
                    );
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    pub async fn ping_all(&self) -> Vec<ShardHealth> {
        let pings = (0..self.shards.len()).map(|idx| {
            let client = self.shards[idx].client.clone();
            async move {
                let result = self.call(idx, async move { client.ping().await }).await;
                let slot = &self.shards[idx];
                ShardHealth {
                    name: slot.client.name().to_string(),
                    healthy: result.is_ok(),
                    breaker: slot.breaker.state(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        });
        join_all(pings).await
    }
}
