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

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::codec::validate_prefix;
use crate::types::{CacheError, Result};

/// TTL policy of one key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSetting {
    pub prefix: String,
    /// Zero disables the local tier for this prefix.
    pub local_ttl: Duration,
    /// Zero disables the shared tier for this prefix.
    pub shared_ttl: Duration,
    /// Zero disables negative caching.
    pub not_found_ttl: Duration,
}

impl PrefixSetting {
    pub fn new(prefix: impl Into<String>, local_ttl: Duration, shared_ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            local_ttl,
            shared_ttl,
            not_found_ttl: Duration::ZERO,
        }
    }

    pub fn with_not_found_ttl(mut self, ttl: Duration) -> Self {
        self.not_found_ttl = ttl;
        self
    }

    pub fn caches_not_found(&self) -> bool {
        !self.not_found_ttl.is_zero()
    }

    pub fn not_found_local_ttl(&self) -> Duration {
        self.local_ttl.min(self.not_found_ttl)
    }

    pub fn not_found_shared_ttl(&self) -> Duration {
        self.shared_ttl.min(self.not_found_ttl)
    }
}

/// Registered prefixes of one cache instance.
///
/// Passed by reference to every component that needs the prefix table,
/// including `clear_all` in test teardown.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    prefixes: RwLock<HashMap<String, PrefixSetting>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: impl IntoIterator<Item = PrefixSetting>) -> Result<Self> {
        let registry = Self::new();
        for setting in settings {
            registry.register(setting)?;
        }
        Ok(registry)
    }

    pub fn register(&self, setting: PrefixSetting) -> Result<()> {
        validate_prefix(&setting.prefix)?;

        let mut prefixes = self.prefixes.write();
        if prefixes.contains_key(&setting.prefix) {
            return Err(CacheError::DuplicatePrefix(setting.prefix));
        }

        info!(
            "Registered cache prefix '{}' (local_ttl={:?}, shared_ttl={:?}, not_found_ttl={:?})",
            setting.prefix, setting.local_ttl, setting.shared_ttl, setting.not_found_ttl
        );
        prefixes.insert(setting.prefix.clone(), setting);
        Ok(())
    }

    pub fn get(&self, prefix: &str) -> Result<PrefixSetting> {
        self.prefixes
            .read()
            .get(prefix)
            .cloned()
            .ok_or_else(|| CacheError::UnknownPrefix(prefix.to_string()))
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.prefixes.read().contains_key(prefix)
    }

    /// Registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prefixes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prefixes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> PrefixSetting {
        PrefixSetting::new("records", Duration::from_secs(10), Duration::from_secs(60))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CacheRegistry::new();
        registry.register(records()).unwrap();

        let setting = registry.get("records").unwrap();
        assert_eq!(setting.local_ttl, Duration::from_secs(10));
        assert!(!setting.caches_not_found());
        assert!(registry.contains("records"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_prefix() {
        let registry = CacheRegistry::with_settings([records()]).unwrap();
        assert_eq!(
            registry.register(records()),
            Err(CacheError::DuplicatePrefix("records".to_string()))
        );
    }

    #[test]
    fn test_unknown_prefix() {
        let registry = CacheRegistry::new();
        assert_eq!(
            registry.get("users"),
            Err(CacheError::UnknownPrefix("users".to_string()))
        );
    }

    #[test]
    fn test_invalid_prefix() {
        let registry = CacheRegistry::new();
        let bad = PrefixSetting::new("a:b", Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(registry.register(bad), Err(CacheError::InvalidKey(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_not_found_ttls_are_capped() {
        let setting = records().with_not_found_ttl(Duration::from_secs(30));
        assert!(setting.caches_not_found());
        assert_eq!(setting.not_found_local_ttl(), Duration::from_secs(10));
        assert_eq!(setting.not_found_shared_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_prefixes_sorted() {
        let registry = CacheRegistry::with_settings([
            PrefixSetting::new("users", Duration::from_secs(1), Duration::from_secs(1)),
            records(),
        ])
        .unwrap();
        assert_eq!(registry.prefixes(), vec!["records", "users"]);
    }
}
