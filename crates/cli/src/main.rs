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

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tiercache_core::cache::{CacheFacade, PrefixSetting};
use tiercache_core::codec::CacheKey;
use tiercache_core::config::{Config, LoggingConfig};
use tiercache_core::types::CacheError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tiercache", version, about = "Inspect and manage a two-tier cache")]
struct Cli {
    /// TOML config file; falls back to environment variables when missing.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Local TTL for prefixes the config does not declare.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    local_ttl: Duration,

    /// Shared TTL for prefixes the config does not declare.
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    shared_ttl: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a key from the cache (never touches the origin).
    Get { prefix: String, id: String },
    /// Write a JSON value (plain text is stored as a JSON string).
    Set {
        prefix: String,
        id: String,
        value: String,
    },
    /// Remove a key from both tiers.
    Del { prefix: String, id: String },
    /// Remove every key under a prefix from both tiers.
    ClearPrefix { prefix: String },
    /// Print the shard owning a key.
    Locate { prefix: String, id: String },
    /// Ping every shard.
    Ping,
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let mut config = if Path::new(path).exists() {
        Config::load_from_file(path).with_context(|| format!("failed to load {}", path))?
    } else {
        Config::load_from_env().context("failed to load configuration from environment")?
    };

    if let Ok(level) = std::env::var("RUST_LOG") {
        config.logging.level = level;
    }
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn ensure_prefix(facade: &CacheFacade, prefix: &str, cli: &Cli) -> anyhow::Result<()> {
    if !facade.registry().contains(prefix) {
        debug!("Prefix '{}' not configured, using command line TTLs", prefix);
        facade
            .registry()
            .register(PrefixSetting::new(prefix, cli.local_ttl, cli.shared_ttl))?;
    }
    Ok(())
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn run(cli: &Cli, facade: &CacheFacade) -> anyhow::Result<()> {
    match &cli.command {
        Command::Get { prefix, id } => {
            ensure_prefix(facade, prefix, cli)?;
            let key = CacheKey::new(prefix.as_str(), id.as_str())?;
            match facade.get::<serde_json::Value>(&key).await {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(CacheError::Miss) => println!("(miss)"),
                Err(CacheError::NotFound(_)) => println!("(not found)"),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Set { prefix, id, value } => {
            ensure_prefix(facade, prefix, cli)?;
            let key = CacheKey::new(prefix.as_str(), id.as_str())?;
            facade.set(&key, &parse_value(value)).await?;
            println!("OK");
        }
        Command::Del { prefix, id } => {
            ensure_prefix(facade, prefix, cli)?;
            let key = CacheKey::new(prefix.as_str(), id.as_str())?;
            facade.delete(&key).await?;
            println!("OK");
        }
        Command::ClearPrefix { prefix } => {
            ensure_prefix(facade, prefix, cli)?;
            let removed = facade.clear_prefix(prefix).await?;
            println!("{}", removed);
        }
        Command::Locate { prefix, id } => {
            let shared = facade
                .shared()
                .ok_or_else(|| anyhow!("no shared shards configured"))?;
            let key = CacheKey::new(prefix.as_str(), id.as_str())?;
            println!("{}\t{}", shared.locate(&key), shared.physical_key(&key));
        }
        Command::Ping => {
            let shared = facade
                .shared()
                .ok_or_else(|| anyhow!("no shared shards configured"))?;
            let health = shared.ping_all().await;
            for shard in &health {
                println!("{}", serde_json::to_string(shard)?);
            }
            if health.iter().any(|h| !h.healthy) {
                return Err(anyhow!("one or more shards unreachable"));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging);

    info!(
        "Cache configured: {} shards, {} prefixes",
        config.shared.shards.len(),
        config.prefixes.len()
    );

    let facade = CacheFacade::from_config(&config).context("failed to build cache")?;
    run(&cli, &facade).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_with_ttls() {
        let cli = Cli::try_parse_from([
            "tiercache",
            "--local-ttl",
            "5s",
            "--shared-ttl",
            "2m",
            "set",
            "records",
            "r1",
            "{\"num\":80}",
        ])
        .unwrap();

        assert_eq!(cli.local_ttl, Duration::from_secs(5));
        assert_eq!(cli.shared_ttl, Duration::from_secs(120));
        assert!(matches!(cli.command, Command::Set { ref id, .. } if id == "r1"));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("{\"num\":80}")["num"], 80);
        assert_eq!(parse_value("hello"), serde_json::Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn test_run_against_local_tier() {
        let facade = CacheFacade::from_config(&Config::default()).unwrap();
        let cli = Cli::try_parse_from(["tiercache", "set", "records", "r1", "42"]).unwrap();
        run(&cli, &facade).await.unwrap();

        let key = CacheKey::new("records", "r1").unwrap();
        assert_eq!(facade.get::<i64>(&key).await.unwrap(), 42);

        let ping = Cli::try_parse_from(["tiercache", "ping"]).unwrap();
        assert!(run(&ping, &facade).await.is_err());
    }
}
