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

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::shared::{CircuitBreakerConfig, DEFAULT_REPLICAS};
use crate::cache::PrefixSetting;
use crate::codec::validate_prefix;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", _0)]
    MissingRequired(String),

    #[error("Invalid configuration value: {}", _0)]
    InvalidValue(String),

    #[error("Configuration file error: {}", _0)]
    FileError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    pub max_entries: usize,
    /// Byte budget for keys + values; 64 MiB by default.
    pub max_bytes: usize,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SharedCacheConfig {
    /// Shard name => `host:port` or `redis://` URL. Names place shards on
    /// the ring, so renaming a shard remaps its keys.
    pub shards: BTreeMap<String, String>,
    pub namespace: String,
    pub pool_size: usize,
    pub replicas: usize,
    pub op_timeout_ms: u64,
    pub breaker: CircuitBreakerConfig,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            shards: BTreeMap::new(),
            namespace: "ca:".to_string(),
            pool_size: 16,
            replicas: DEFAULT_REPLICAS,
            op_timeout_ms: 500,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl SharedCacheConfig {
    pub fn is_enabled(&self) -> bool {
        !self.shards.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrefixConfig {
    pub prefix: String,
    pub local_ttl_secs: u64,
    pub shared_ttl_secs: u64,
    #[serde(default)]
    pub not_found_ttl_secs: u64,
}

impl PrefixConfig {
    pub fn to_setting(&self) -> PrefixSetting {
        PrefixSetting {
            prefix: self.prefix.clone(),
            local_ttl: Duration::from_secs(self.local_ttl_secs),
            shared_ttl: Duration::from_secs(self.shared_ttl_secs),
            not_found_ttl: Duration::from_secs(self.not_found_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on how long a caller waits for an in-flight load;
    /// 0 waits for as long as the load takes.
    pub wait_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 0,
        }
    }
}

impl FetchConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub local: LocalCacheConfig,
    pub shared: SharedCacheConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
    pub prefixes: Vec<PrefixConfig>,
}

impl Config {
    pub fn load_from_file(path: &str) -> ConfigResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileError(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> ConfigResult<Self> {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment values onto `self`. `lookup` is `std::env::var`
    /// in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(size) = lookup("LOCAL_CACHE_SIZE") {
            self.local.max_bytes = size
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LOCAL_CACHE_SIZE".to_string()))?;
        }
        if let Some(entries) = lookup("LOCAL_CACHE_ENTRIES") {
            self.local.max_entries = entries
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LOCAL_CACHE_ENTRIES".to_string()))?;
        }

        // REDIS_ADDRS=server1:host1:6379,server2:host2:6379
        if let Some(addrs) = lookup("REDIS_ADDRS") {
            let mut shards = BTreeMap::new();
            for item in addrs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (name, addr) = item
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidValue(format!("REDIS_ADDRS entry '{}'", item)))?;
                shards.insert(name.to_string(), addr.to_string());
            }
            self.shared.shards = shards;
        }

        if let Some(namespace) = lookup("SHARED_NAMESPACE") {
            self.shared.namespace = namespace;
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.local.max_entries == 0 {
            return Err(ConfigError::InvalidValue("local.max_entries must be > 0".to_string()));
        }
        if self.local.max_bytes == 0 {
            return Err(ConfigError::InvalidValue("local.max_bytes must be > 0".to_string()));
        }
        if self.shared.is_enabled() && self.shared.op_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "shared.op_timeout_ms must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for prefix in &self.prefixes {
            validate_prefix(&prefix.prefix)
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
            if !seen.insert(prefix.prefix.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "prefix '{}' configured twice",
                    prefix.prefix
                )));
            }
        }
        Ok(())
    }

    pub fn prefix_settings(&self) -> Vec<PrefixSetting> {
        self.prefixes.iter().map(PrefixConfig::to_setting).collect()
    }
}
