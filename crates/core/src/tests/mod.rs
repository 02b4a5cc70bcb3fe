//! Cross-module tests: the facade over real tiers, and the records DAO.

mod facade_tests;

use std::sync::Arc;

use crate::cache::shared::MemoryShard;
use crate::cache::{
    CacheFacade, CacheRegistry, FetchSettings, LocalCache, PrefixSetting, SharedCache, ShardClient,
};
use crate::config::SharedCacheConfig;

/// Facade over a fresh local tier and in-process shards named `names`.
pub(crate) fn memory_facade(
    names: &[&str],
    settings: Vec<PrefixSetting>,
) -> (CacheFacade, Vec<Arc<MemoryShard>>) {
    let shards: Vec<Arc<MemoryShard>> = names.iter().map(|n| Arc::new(MemoryShard::new(*n))).collect();
    let clients = shards
        .iter()
        .map(|s| s.clone() as Arc<dyn ShardClient>)
        .collect();
    let shared = SharedCache::new(clients, &SharedCacheConfig::default())
        .expect("Failed to build shared tier");
    let registry = CacheRegistry::with_settings(settings).expect("Failed to build registry");

    let facade = CacheFacade::new(
        Arc::new(LocalCache::new(10_000, 16 * 1024 * 1024)),
        Some(Arc::new(shared)),
        Arc::new(registry),
        FetchSettings::default(),
    );
    (facade, shards)
}
