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

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coordinator::{FetchCoordinator, LoadOutcome};
use super::local_cache::LocalCache;
use super::registry::{CacheRegistry, PrefixSetting};
use super::shared::SharedCache;
use crate::codec::{decode_frame, decode_payload, encode_not_found, encode_value, CacheKey, Frame};
use crate::config::{Config, FetchConfig};
use crate::types::{CacheError, Result, Tier};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSettings {
    /// How long a caller waits on a load before giving up with
    /// [`CacheError::Timeout`]. `None` waits for the load to finish.
    pub wait_timeout: Option<Duration>,
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            wait_timeout: config.wait_timeout(),
        }
    }
}

/// Outcome of one key in a batched read.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Hit(T),
    Miss,
    Error(CacheError),
}

impl<T> Slot<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Slot::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Slot::Miss)
    }

    pub fn hit(&self) -> Option<&T> {
        match self {
            Slot::Hit(value) => Some(value),
            _ => None,
        }
    }

    /// Same shape as a single-key `get`: a miss becomes [`CacheError::Miss`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Slot::Hit(value) => Ok(value),
            Slot::Miss => Err(CacheError::Miss),
            Slot::Error(e) => Err(e),
        }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Slot::Hit(value),
            Err(CacheError::Miss) => Slot::Miss,
            Err(e) => Slot::Error(e),
        }
    }

    /// Keys worth sending to the origin: misses, and shard failures whose
    /// answer is unknown.
    fn needs_load(&self) -> bool {
        matches!(self, Slot::Miss | Slot::Error(CacheError::Backend(_)))
    }
}

/// Batched read result, aligned with the requested keys.
#[derive(Debug, Clone, PartialEq)]
pub struct MGetResult<T> {
    slots: Vec<Slot<T>>,
}

impl<T> MGetResult<T> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Slot<T>> {
        self.slots.iter()
    }

    pub fn hits(&self) -> usize {
        self.slots.iter().filter(|s| s.is_hit()).count()
    }

    pub fn into_slots(self) -> Vec<Slot<T>> {
        self.slots
    }
}

impl<T> IntoIterator for MGetResult<T> {
    type Item = Slot<T>;
    type IntoIter = std::vec::IntoIter<Slot<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    requests: AtomicU64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_errors: AtomicU64,
    backend_errors: AtomicU64,
    codec_errors: AtomicU64,
}

impl CacheStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, in_flight: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            codec_errors: self.codec_errors.load(Ordering::Relaxed),
            in_flight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub requests: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_errors: u64,
    pub backend_errors: u64,
    pub codec_errors: u64,
    pub in_flight: usize,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.local_hits + self.shared_hits) as f64 / self.requests as f64
    }
}

/// Result of looking a key up in both tiers.
enum TierRead {
    Hit(Frame),
    Miss,
    /// The shared tier could not answer.
    Unknown(CacheError),
}

/// The two tiers plus counters. Shared with spawned loads.
#[derive(Debug)]
struct Tiers {
    local: Arc<LocalCache>,
    shared: Option<Arc<SharedCache>>,
    stats: CacheStats,
}

impl Tiers {
    fn shared_for(&self, setting: &PrefixSetting) -> Option<&SharedCache> {
        if setting.shared_ttl.is_zero() {
            return None;
        }
        self.shared.as_deref()
    }

    async fn read(&self, key: &CacheKey, setting: &PrefixSetting) -> Result<TierRead> {
        let rendered = key.render();

        if let Some(raw) = self.local.get(&rendered) {
            CacheStats::incr(&self.stats.local_hits);
            debug!("Local hit for key: {}", rendered);
            return self.decode(&raw).map(TierRead::Hit);
        }

        let shared = match self.shared_for(setting) {
            Some(shared) => shared,
            None => return Ok(TierRead::Miss),
        };

        match shared.get(key).await {
            Ok(Some(raw)) => {
                CacheStats::incr(&self.stats.shared_hits);
                debug!("Shared hit for key: {}", rendered);
                self.accept_shared(key, setting, raw).map(TierRead::Hit)
            }
            Ok(None) => Ok(TierRead::Miss),
            Err(e) => {
                CacheStats::incr(&self.stats.backend_errors);
                warn!("Shared get failed for key {}, treating as unknown: {}", rendered, e);
                Ok(TierRead::Unknown(e))
            }
        }
    }

    /// Validates a frame read from the shared tier and copies it into the
    /// local tier.
    fn accept_shared(&self, key: &CacheKey, setting: &PrefixSetting, raw: Bytes) -> Result<Frame> {
        let frame = self.decode(&raw)?;
        let ttl = match frame {
            Frame::Value(_) => setting.local_ttl,
            Frame::NotFound => setting.not_found_local_ttl(),
        };
        self.local.set(&key.render(), raw, ttl);
        Ok(frame)
    }

    fn decode(&self, raw: &[u8]) -> Result<Frame> {
        decode_frame(raw).map_err(|e| {
            CacheStats::incr(&self.stats.codec_errors);
            e
        })
    }

    /// Shared first, local last. A shared failure is logged, never returned.
    async fn populate(&self, key: &CacheKey, raw: Bytes, local_ttl: Duration, shared_ttl: Duration) {
        if let Some(shared) = self.shared.as_deref() {
            if let Err(e) = shared.set(key, raw.clone(), shared_ttl).await {
                CacheStats::incr(&self.stats.backend_errors);
                warn!("Failed to populate {} tier for key {}: {}", Tier::Shared, key, e);
            }
        }
        self.local.set(&key.render(), raw, local_ttl);
    }

    fn value_of<T: DeserializeOwned>(&self, key: &CacheKey, frame: Frame) -> Result<T> {
        match frame {
            Frame::Value(payload) => decode_payload(&payload).map_err(|e| {
                CacheStats::incr(&self.stats.codec_errors);
                e
            }),
            Frame::NotFound => Err(CacheError::NotFound(key.to_string())),
        }
    }
}

/// Read-through cache over the local and shared tiers.
///
/// Cheap to clone; clones share tiers, registry and in-flight loads.
#[derive(Debug, Clone)]
pub struct CacheFacade {
    tiers: Arc<Tiers>,
    coordinator: Arc<FetchCoordinator>,
    registry: Arc<CacheRegistry>,
    settings: FetchSettings,
}

impl CacheFacade {
    pub fn new(
        local: Arc<LocalCache>,
        shared: Option<Arc<SharedCache>>,
        registry: Arc<CacheRegistry>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            tiers: Arc::new(Tiers {
                local,
                shared,
                stats: CacheStats::default(),
            }),
            coordinator: Arc::new(FetchCoordinator::new()),
            registry,
            settings,
        }
    }

    /// Builds the local tier, the Redis shard ring (when shards are
    /// configured) and the prefix registry from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        let local = Arc::new(LocalCache::from_config(&config.local));
        let shared = if config.shared.is_enabled() {
            Some(Arc::new(SharedCache::connect(&config.shared)?))
        } else {
            info!("No shared shards configured, running local tier only");
            None
        };
        let registry = Arc::new(CacheRegistry::with_settings(config.prefix_settings())?);

        Ok(Self::new(local, shared, registry, FetchSettings::from(&config.fetch)))
    }

    pub fn local(&self) -> &LocalCache {
        &self.tiers.local
    }

    pub fn shared(&self) -> Option<&SharedCache> {
        self.tiers.shared.as_deref()
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Cache-only read: local, then shared. Never calls the origin.
    ///
    /// Returns [`CacheError::Miss`] when neither tier has the key, and the
    /// shard's error when the shared tier could not answer.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T> {
        let setting = self.registry.get(key.prefix())?;
        CacheStats::incr(&self.tiers.stats.requests);

        match self.tiers.read(key, &setting).await? {
            TierRead::Hit(frame) => self.tiers.value_of(key, frame),
            TierRead::Miss => {
                CacheStats::incr(&self.tiers.stats.misses);
                Err(CacheError::Miss)
            }
            TierRead::Unknown(e) => Err(e),
        }
    }

    /// Read-through get. On a miss in both tiers `loader` is consulted,
    /// at most once per key across concurrent callers in this process.
    ///
    /// The future returned by `loader` is only polled when this call leads
    /// the load. `Ok(None)` from it means the record does not exist and is
    /// returned as [`CacheError::NotFound`]; loader errors are returned
    /// unchanged and never cached.
    pub async fn get_by_func<T, F, Fut>(&self, key: &CacheKey, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        self.get_by_func_until(key, loader, std::future::pending::<()>())
            .await
    }

    /// [`get_by_func`](Self::get_by_func) that gives up with
    /// [`CacheError::Cancelled`] when `cancel` completes first. The load
    /// keeps running for other callers.
    pub async fn get_by_func_until<T, F, Fut, C>(
        &self,
        key: &CacheKey,
        loader: F,
        cancel: C,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
        C: Future,
    {
        let setting = self.registry.get(key.prefix())?;
        CacheStats::incr(&self.tiers.stats.requests);

        match self.tiers.read(key, &setting).await? {
            TierRead::Hit(frame) => return self.tiers.value_of(key, frame),
            TierRead::Miss | TierRead::Unknown(_) => {
                CacheStats::incr(&self.tiers.stats.misses);
            }
        }

        self.load_through(key, setting, loader(), cancel).await
    }

    async fn load_through<T, Fut, C>(
        &self,
        key: &CacheKey,
        setting: PrefixSetting,
        origin: Fut,
        cancel: C,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
        C: Future,
    {
        let load = load_and_populate(self.tiers.clone(), key.clone(), setting, origin);
        let rendered = key.render();
        let resolved = self.coordinator.resolve_until(&rendered, load, cancel);

        let outcome = match self.settings.wait_timeout {
            Some(wait) => tokio::time::timeout(wait, resolved)
                .await
                .map_err(|_| CacheError::Timeout)?,
            None => resolved.await,
        };

        match outcome? {
            Some(raw) => {
                let frame = self.tiers.decode(&raw)?;
                self.tiers.value_of(key, frame)
            }
            None => Err(CacheError::NotFound(key.to_string())),
        }
    }

    /// Batched cache-only read: one local pass, then one shared request per
    /// shard for whatever the local tier did not have.
    ///
    /// Each slot equals what [`get`](Self::get) would return for that key.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[CacheKey]) -> MGetResult<T> {
        let mut slots: Vec<Option<Slot<T>>> = (0..keys.len()).map(|_| None).collect();
        let mut settings: Vec<Option<PrefixSetting>> = (0..keys.len()).map(|_| None).collect();
        let mut remote: Vec<usize> = Vec::new();

        for (pos, key) in keys.iter().enumerate() {
            let setting = match self.registry.get(key.prefix()) {
                Ok(setting) => setting,
                Err(e) => {
                    slots[pos] = Some(Slot::Error(e));
                    continue;
                }
            };
            CacheStats::incr(&self.tiers.stats.requests);

            if let Some(raw) = self.tiers.local.get(&key.render()) {
                CacheStats::incr(&self.tiers.stats.local_hits);
                let value = self
                    .tiers
                    .decode(&raw)
                    .and_then(|frame| self.tiers.value_of(key, frame));
                slots[pos] = Some(Slot::from_result(value));
            } else if self.tiers.shared_for(&setting).is_some() {
                remote.push(pos);
            } else {
                CacheStats::incr(&self.tiers.stats.misses);
                slots[pos] = Some(Slot::Miss);
            }
            settings[pos] = Some(setting);
        }

        let shared = self.tiers.shared.as_deref().filter(|_| !remote.is_empty());
        if let Some(shared) = shared {
            let batch: Vec<CacheKey> = remote.iter().map(|&pos| keys[pos].clone()).collect();
            let results = shared.mget(&batch).await;

            for (&pos, result) in remote.iter().zip(results) {
                let key = &keys[pos];
                slots[pos] = Some(match (result, settings[pos].as_ref()) {
                    (Ok(Some(raw)), Some(setting)) => {
                        CacheStats::incr(&self.tiers.stats.shared_hits);
                        let value = self
                            .tiers
                            .accept_shared(key, setting, raw)
                            .and_then(|frame| self.tiers.value_of(key, frame));
                        Slot::from_result(value)
                    }
                    (Err(e), _) => {
                        CacheStats::incr(&self.tiers.stats.backend_errors);
                        Slot::Error(e)
                    }
                    _ => {
                        CacheStats::incr(&self.tiers.stats.misses);
                        Slot::Miss
                    }
                });
            }
        }

        MGetResult {
            slots: slots
                .into_iter()
                .map(|slot| slot.unwrap_or(Slot::Miss))
                .collect(),
        }
    }

    /// Batched read-through: [`mget`](Self::mget), then every key still
    /// unresolved goes through the single-flight path on its own, all
    /// concurrently, so one slow origin call does not hold up the others.
    pub async fn mget_by_func<T, F, Fut>(&self, keys: &[CacheKey], loader: F) -> MGetResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(&CacheKey) -> Fut,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let mut result = self.mget::<T>(keys).await;

        let pending: Vec<usize> = result
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.needs_load())
            .map(|(pos, _)| pos)
            .collect();
        if pending.is_empty() {
            return result;
        }

        let loads = pending.into_iter().map(|pos| {
            let key = &keys[pos];
            let origin = loader(key);
            async move {
                let value = match self.registry.get(key.prefix()) {
                    Ok(setting) => {
                        self.load_through(key, setting, origin, std::future::pending::<()>())
                            .await
                    }
                    Err(e) => Err(e),
                };
                (pos, value)
            }
        });

        for (pos, value) in join_all(loads).await {
            result.slots[pos] = match value {
                Ok(value) => Slot::Hit(value),
                Err(e) => Slot::Error(e),
            };
        }
        result
    }

    /// Writes `value` to the shared tier (best-effort) and then the local one.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let setting = self.registry.get(key.prefix())?;
        let raw = encode_value(value).map_err(|e| {
            CacheStats::incr(&self.tiers.stats.codec_errors);
            e
        })?;
        self.tiers
            .populate(key, raw, setting.local_ttl, setting.shared_ttl)
            .await;
        Ok(())
    }

    /// Removes `key` from both tiers. The local copy is always dropped; a
    /// shared failure is returned so the caller knows a stale copy may
    /// survive until its TTL.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.registry.get(key.prefix())?;
        self.tiers.local.delete(&key.render());

        if let Some(shared) = self.tiers.shared.as_deref() {
            shared.delete(key).await?;
        }
        Ok(())
    }

    /// Drops every key of `prefix` from both tiers. Returns the number of
    /// entries removed.
    pub async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        self.registry.get(prefix)?;
        let mut removed = self.tiers.local.clear_prefix(prefix);

        if let Some(shared) = self.tiers.shared.as_deref() {
            removed += shared.clear_prefix(prefix).await?;
        }
        info!("Cleared {} entries under prefix '{}'", removed, prefix);
        Ok(removed)
    }

    /// Clears every registered prefix.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for prefix in self.registry.prefixes() {
            removed += self.clear_prefix(&prefix).await?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.tiers.stats.snapshot(self.coordinator.in_flight())
    }
}

/// The load a leader spawns: origin call, then both tiers, then the framed
/// outcome for every waiter. Errors are returned without touching the tiers.
async fn load_and_populate<T, Fut>(
    tiers: Arc<Tiers>,
    key: CacheKey,
    setting: PrefixSetting,
    origin: Fut,
) -> LoadOutcome
where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send + 'static,
{
    CacheStats::incr(&tiers.stats.loads);

    let loaded = match origin.await {
        Ok(loaded) => loaded,
        Err(e) => {
            CacheStats::incr(&tiers.stats.load_errors);
            warn!("Origin load failed for key {}: {}", key, e);
            return Err(e);
        }
    };

    match loaded {
        Some(value) => {
            let raw = encode_value(&value).map_err(|e| {
                CacheStats::incr(&tiers.stats.codec_errors);
                e
            })?;
            tiers
                .populate(&key, raw.clone(), setting.local_ttl, setting.shared_ttl)
                .await;
            Ok(Some(raw))
        }
        None if setting.caches_not_found() => {
            debug!("Caching not-found marker for key {}", key);
            tiers
                .populate(
                    &key,
                    encode_not_found(),
                    setting.not_found_local_ttl(),
                    setting.not_found_shared_ttl(),
                )
                .await;
            Ok(None)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::shared::{MemoryShard, ShardClient};
    use crate::config::SharedCacheConfig;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        num: i64,
    }

    fn item(id: &str, num: i64) -> Item {
        Item {
            id: id.to_string(),
            num,
        }
    }

    fn facade_with(setting: PrefixSetting) -> (CacheFacade, Arc<MemoryShard>) {
        let shard = Arc::new(MemoryShard::new("server1"));
        let shared = SharedCache::new(
            vec![shard.clone() as Arc<dyn ShardClient>],
            &SharedCacheConfig::default(),
        )
        .unwrap();
        let registry = CacheRegistry::with_settings([setting]).unwrap();
        let facade = CacheFacade::new(
            Arc::new(LocalCache::new(1024, 1024 * 1024)),
            Some(Arc::new(shared)),
            Arc::new(registry),
            FetchSettings::default(),
        );
        (facade, shard)
    }

    fn records() -> PrefixSetting {
        PrefixSetting::new("records", Duration::from_secs(10), Duration::from_secs(60))
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new("records", id).unwrap()
    }

    #[tokio::test]
    async fn test_get_miss_then_set_hit() {
        let (facade, shard) = facade_with(records());

        assert_eq!(facade.get::<Item>(&key("r1")).await, Err(CacheError::Miss));

        facade.set(&key("r1"), &item("r1", 80)).await.unwrap();
        assert!(shard.contains("ca:records:r1"));
        assert_eq!(facade.get::<Item>(&key("r1")).await.unwrap(), item("r1", 80));

        let stats = facade.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_unknown_prefix_rejected() {
        let (facade, _) = facade_with(records());
        let users = CacheKey::new("users", "u1").unwrap();

        assert_eq!(
            facade.get::<Item>(&users).await,
            Err(CacheError::UnknownPrefix("users".to_string()))
        );
        assert!(facade.set(&users, &item("u1", 1)).await.is_err());
        assert!(facade.clear_prefix("users").await.is_err());
    }

    #[tokio::test]
    async fn test_shared_hit_populates_local() {
        let (facade, _) = facade_with(records());
        facade.set(&key("r1"), &item("r1", 80)).await.unwrap();
        facade.local().clear();

        assert_eq!(facade.get::<Item>(&key("r1")).await.unwrap(), item("r1", 80));
        assert!(facade.local().get("records:r1").is_some());
        assert_eq!(facade.stats().shared_hits, 1);
    }

    #[tokio::test]
    async fn test_get_by_func_not_found_is_not_cached_by_default() {
        let (facade, shard) = facade_with(records());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let result = facade
                .get_by_func::<Item, _, _>(&key("missing"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await;
            assert_eq!(result, Err(CacheError::NotFound("records:missing".to_string())));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(shard.is_empty());
        assert!(facade.local().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_cached_when_enabled() {
        let setting = records().with_not_found_ttl(Duration::from_secs(5));
        let (facade, shard) = facade_with(setting);
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None::<Item>)
            }
        };

        let first = facade.get_by_func(&key("missing"), load(calls.clone())).await;
        assert!(first.unwrap_err().is_not_found());
        assert!(shard.contains("ca:records:missing"));

        let second = facade.get_by_func(&key("missing"), load(calls.clone())).await;
        assert!(second.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // plain get reports the marker too
        assert!(facade.get::<Item>(&key("missing")).await.unwrap_err().is_not_found());

        tokio::time::advance(Duration::from_secs(6)).await;
        let third = facade.get_by_func(&key("missing"), load(calls.clone())).await;
        assert!(third.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_outage_falls_through_to_origin() {
        let (facade, shard) = facade_with(records());
        shard.set_reachable(false);

        let value = facade
            .get_by_func(&key("r1"), || async { Ok(Some(item("r1", 80))) })
            .await
            .unwrap();
        assert_eq!(value, item("r1", 80));

        // local still populated; the shared write failure was swallowed
        assert!(facade.local().get("records:r1").is_some());
        assert!(facade.stats().backend_errors >= 2);
    }

    #[tokio::test]
    async fn test_get_reports_backend_error_as_unknown() {
        let (facade, shard) = facade_with(records());
        shard.set_reachable(false);

        let err = facade.get::<Item>(&key("r1")).await.unwrap_err();
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn test_zero_local_ttl_skips_local_tier() {
        let setting = PrefixSetting::new("records", Duration::ZERO, Duration::from_secs(60));
        let (facade, shard) = facade_with(setting);

        facade.set(&key("r1"), &item("r1", 1)).await.unwrap();
        assert!(facade.local().is_empty());
        assert!(shard.contains("ca:records:r1"));
        assert_eq!(facade.get::<Item>(&key("r1")).await.unwrap(), item("r1", 1));
    }

    #[tokio::test]
    async fn test_delete_and_clear_prefix() {
        let (facade, shard) = facade_with(records());
        for i in 0..4 {
            let id = format!("r{}", i);
            facade.set(&key(&id), &item(&id, i)).await.unwrap();
        }

        facade.delete(&key("r0")).await.unwrap();
        assert_eq!(facade.get::<Item>(&key("r0")).await, Err(CacheError::Miss));

        // three local + three shared
        assert_eq!(facade.clear_prefix("records").await.unwrap(), 6);
        assert!(shard.is_empty());
        assert!(facade.local().is_empty());
    }

    #[tokio::test]
    async fn test_mget_mixed_tiers() {
        let (facade, _) = facade_with(records());
        facade.set(&key("local"), &item("local", 1)).await.unwrap();
        facade.set(&key("shared"), &item("shared", 2)).await.unwrap();
        facade.local().delete("records:shared");

        let keys = vec![
            key("local"),
            key("shared"),
            key("absent"),
            CacheKey::new("users", "u1").unwrap(),
        ];
        let result = facade.mget::<Item>(&keys).await;

        assert_eq!(result.len(), 4);
        assert_eq!(result.get(0), Some(&Slot::Hit(item("local", 1))));
        assert_eq!(result.get(1), Some(&Slot::Hit(item("shared", 2))));
        assert_eq!(result.get(2), Some(&Slot::Miss));
        assert_eq!(
            result.get(3),
            Some(&Slot::Error(CacheError::UnknownPrefix("users".to_string())))
        );
        assert_eq!(result.hits(), 2);
        assert!(facade.local().get("records:shared").is_some());
    }

    #[tokio::test]
    async fn test_mget_by_func_loads_only_misses() {
        let (facade, _) = facade_with(records());
        facade.set(&key("r0"), &item("r0", 0)).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let keys: Vec<CacheKey> = ["r0", "r1", "r2"].iter().map(|id| key(id)).collect();
        let loaded = {
            let calls = calls.clone();
            facade
                .mget_by_func(&keys, move |k: &CacheKey| {
                    let calls = calls.clone();
                    let id = k.id().to_string();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if id == "r2" {
                            return Ok(None);
                        }
                        Ok(Some(item(&id, 7)))
                    }
                })
                .await
        };

        let slots = loaded.into_slots();
        assert_eq!(slots[0], Slot::Hit(item("r0", 0)));
        assert_eq!(slots[1], Slot::Hit(item("r1", 7)));
        assert_eq!(
            slots[2],
            Slot::Error(CacheError::NotFound("records:r2".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let (facade, _) = facade_with(records());
        let facade = CacheFacade {
            settings: FetchSettings {
                wait_timeout: Some(Duration::from_millis(50)),
            },
            ..facade
        };

        let result = facade
            .get_by_func(&key("slow"), || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(Some(item("slow", 1)))
            })
            .await;
        assert_eq!(result, Err(CacheError::Timeout));

        // the load finished in the background and populated the tiers
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(facade.get::<Item>(&key("slow")).await.unwrap(), item("slow", 1));
    }

    #[tokio::test]
    async fn test_corrupt_shared_entry_is_codec_error() {
        let (facade, shard) = facade_with(records());
        shard
            .set("ca:records:bad", Bytes::from_static(b"garbage"), Duration::from_secs(60))
            .await
            .unwrap();

        let err = facade.get::<Item>(&key("bad")).await.unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
        assert_eq!(facade.stats().codec_errors, 1);
    }
}
