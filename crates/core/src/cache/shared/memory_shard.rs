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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use super::ShardClient;
use crate::cache::expires_after;
use crate::types::{CacheError, Result};

/// In-process shard.
///
/// Behaves like a remote node (own TTLs, per-call failures) without a
/// network hop. Useful for single-process deployments, and for exercising
/// shard outages via [`MemoryShard::set_reachable`].
#[derive(Debug)]
pub struct MemoryShard {
    name: String,
    entries: DashMap<String, (Bytes, Instant)>,
    reachable: AtomicBool,
    get_calls: AtomicUsize,
    mget_calls: AtomicUsize,
    set_calls: AtomicUsize,
}

impl MemoryShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            reachable: AtomicBool::new(true),
            get_calls: AtomicUsize::new(0),
            mget_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    pub fn mget_calls(&self) -> usize {
        self.mget_calls.load(Ordering::Relaxed)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("shard '{}' unreachable", self.name)))
        }
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) if now < entry.1 => return Some(entry.0.clone()),
            Some(_) => true,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, expires_at)| now >= *expires_at);
        }
        None
    }
}

#[async_trait]
impl ShardClient for MemoryShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        Ok(self.lookup(key))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.mget_calls.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        Ok(keys.iter().map(|k| self.lookup(k)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        self.entries
            .insert(key.to_string(), (value, expires_after(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, pattern: &str) -> Result<usize> {
        self.check()?;
        let mut removed = 0;
        self.entries.retain(|k, _| {
            let doomed = k.starts_with(pattern);
            removed += usize::from(doomed);
            !doomed
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
