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

use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::expires_after;
use crate::codec::prefix_pattern;
use crate::config::LocalCacheConfig;

struct LocalEntry {
    value: Bytes,
    expires_at: Instant,
}

struct LocalInner {
    entries: LruCache<String, LocalEntry>,
    size_bytes: usize,
    evictions: u64,
}

impl LocalInner {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.size_bytes -= weight(key, &entry.value);
                true
            }
            None => false,
        }
    }
}

fn weight(key: &str, value: &Bytes) -> usize {
    key.len() + value.len()
}

/// Process-local tier.
///
/// Bounded by entry count and by byte budget (key + value bytes). Eviction is
/// least-recently-used: reads promote, and inserts evict from the cold end
/// until both bounds hold. Expiry is checked lazily on read; `purge_expired`
/// can be driven by a sweeper if memory must be reclaimed eagerly.
pub struct LocalCache {
    inner: Mutex<LocalInner>,
    max_entries: usize,
    max_bytes: usize,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LocalCache")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .field("len", &inner.entries.len())
            .field("size_bytes", &inner.size_bytes)
            .finish()
    }
}

impl LocalCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        assert!(max_entries > 0, "max_entries must be greater than 0");
        assert!(max_bytes > 0, "max_bytes must be greater than 0");

        Self {
            inner: Mutex::new(LocalInner {
                entries: LruCache::unbounded(),
                size_bytes: 0,
                evictions: 0,
            }),
            max_entries,
            max_bytes,
        }
    }

    pub fn from_config(config: &LocalCacheConfig) -> Self {
        Self::new(config.max_entries, config.max_bytes)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.entries.get(key) {
            None => return None,
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
        }

        inner.remove(key);
        debug!("Local entry expired for key: {}", key);
        None
    }

    /// Stores `value` for `ttl`. A zero TTL removes the key instead, and a
    /// value that alone exceeds the byte budget is not stored.
    pub fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let mut inner = self.inner.lock();

        if ttl.is_zero() {
            inner.remove(key);
            return;
        }

        let entry_weight = weight(key, &value);
        if entry_weight > self.max_bytes {
            inner.remove(key);
            debug!(
                "Skipping local set for key: {}, {} bytes exceeds budget {}",
                key, entry_weight, self.max_bytes
            );
            return;
        }

        let entry = LocalEntry {
            value,
            expires_at: expires_after(ttl),
        };
        if let Some(old) = inner.entries.put(key.to_string(), entry) {
            inner.size_bytes -= weight(key, &old.value);
        }
        inner.size_bytes += entry_weight;

        while inner.entries.len() > self.max_entries || inner.size_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.size_bytes -= weight(&evicted_key, &evicted.value);
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key)
    }

    /// Removes every key under `prefix`. Returns the number removed.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let pattern = prefix_pattern(prefix);
        let mut inner = self.inner.lock();

        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&pattern))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_bytes = 0;
    }

    /// Drops every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size_bytes
    }

    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }
}
