//! Environment-driven configuration.
//!
//! Resolves the chain list through a three-tier order: a `CHAINS_CONFIG` JSON array, then
//! per-chain `CHAIN_<id>_*` variables keyed off `CHAIN_IDS`, then a single legacy chain built
//! from `RPC_URL`/`TOKEN_ADDRESS`/`START_BLOCK`/`CHAIN_ID`/`CHAIN_NAME` with PulseChain
//! defaults. First tier that yields a non-empty list wins.

use std::net::IpAddr;
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::types::EvmAddress;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CHAINS_CONFIG JSON: {0}")]
    ChainsConfigJson(#[from] serde_json::Error),
    #[error("invalid value for {var}: {source}")]
    InvalidEnvVar {
        var: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

mod config_defaults {
    use std::net::IpAddr;

    pub fn default_host() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub const DATABASE_PATH: &str = "./data/indexer.db";
    pub const BATCH_SIZE: u64 = 10000;

    pub const LEGACY_RPC_URL: &str = "https://rpc.pulsechain.com";
    pub const LEGACY_TOKEN_ADDRESS: &str = "0x7b39712Ef45F7dcED2bBDF11F3D5046bA61dA719";
    pub const LEGACY_START_BLOCK: i64 = 20326117;
    pub const LEGACY_CHAIN_ID: i64 = 369;
    pub const LEGACY_CHAIN_NAME: &str = "PulseChain";
}

/// CLI arguments; every field may also be supplied via the environment variable of the same
/// name (`clap`'s `env` feature), matching the rest of this module's env-first resolution.
#[derive(Parser, Debug)]
#[command(name = "erc20-indexer")]
#[command(about = "Multi-chain ERC-20 Transfer indexer")]
pub struct CliArgs {
    /// Path to a `.env` file to load before resolving configuration.
    #[arg(long, env = "ENV_FILE", default_value = ".env")]
    pub env_file: String,
}

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub chain_id: i64,
    pub chain_name: String,
    pub rpc_url: String,
    pub token_address: EvmAddress,
    pub start_block: i64,
}

#[derive(Debug, Deserialize)]
struct ChainConfigJson {
    chain_id: i64,
    chain_name: String,
    rpc_url: String,
    token_address: String,
    start_block: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub database_path: String,
    pub default_batch_size: u64,
    pub chains: Vec<ChainSettings>,
}

impl Config {
    /// Resolves configuration from the process environment. Call after [`CliArgs::parse`] has
    /// loaded the `.env` file it names, so the env vars below see its contents.
    pub fn load() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(config_defaults::default_host);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(config_defaults::default_port);
        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| config_defaults::DATABASE_PATH.to_string());
        let default_batch_size = std::env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config_defaults::BATCH_SIZE);

        Ok(Self {
            host,
            port,
            database_path,
            default_batch_size,
            chains: resolve_chains()?,
        })
    }
}

fn resolve_chains() -> Result<Vec<ChainSettings>, ConfigError> {
    if let Ok(json) = std::env::var("CHAINS_CONFIG") {
        if !json.trim().is_empty() {
            let parsed: Vec<ChainConfigJson> = serde_json::from_str(&json)?;
            let mut chains = Vec::with_capacity(parsed.len());
            for entry in parsed {
                chains.push(ChainSettings {
                    chain_id: entry.chain_id,
                    chain_name: entry.chain_name,
                    rpc_url: entry.rpc_url,
                    token_address: parse_address("token_address", &entry.token_address)?,
                    start_block: entry.start_block,
                });
            }
            return Ok(chains);
        }
    }

    if let Ok(chain_ids) = std::env::var("CHAIN_IDS") {
        let mut chains = Vec::new();
        for raw_id in chain_ids.split(',') {
            let raw_id = raw_id.trim();
            if raw_id.is_empty() {
                continue;
            }
            let chain_id: i64 = raw_id.parse().map_err(|e| invalid_env("CHAIN_IDS", e))?;
            let name = std::env::var(format!("CHAIN_{chain_id}_NAME"))
                .unwrap_or_else(|_| format!("Chain-{chain_id}"));
            let rpc_url = std::env::var(format!("CHAIN_{chain_id}_RPC_URL")).ok();
            let token_address = std::env::var(format!("CHAIN_{chain_id}_TOKEN_ADDRESS")).ok();
            let start_block: i64 = std::env::var(format!("CHAIN_{chain_id}_START_BLOCK"))
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0);

            if let (Some(rpc_url), Some(token_address)) = (rpc_url, token_address) {
                chains.push(ChainSettings {
                    chain_id,
                    chain_name: name,
                    rpc_url,
                    token_address: parse_address("CHAIN_<id>_TOKEN_ADDRESS", &token_address)?,
                    start_block,
                });
            }
        }
        if !chains.is_empty() {
            return Ok(chains);
        }
    }

    let rpc_url =
        std::env::var("RPC_URL").unwrap_or_else(|_| config_defaults::LEGACY_RPC_URL.to_string());
    let token_address = std::env::var("TOKEN_ADDRESS")
        .unwrap_or_else(|_| config_defaults::LEGACY_TOKEN_ADDRESS.to_string());
    let start_block: i64 = std::env::var("START_BLOCK")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config_defaults::LEGACY_START_BLOCK);
    let chain_id: i64 = std::env::var("CHAIN_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config_defaults::LEGACY_CHAIN_ID);
    let chain_name = std::env::var("CHAIN_NAME")
        .unwrap_or_else(|_| config_defaults::LEGACY_CHAIN_NAME.to_string());

    Ok(vec![ChainSettings {
        chain_id,
        chain_name,
        rpc_url,
        token_address: parse_address("TOKEN_ADDRESS", &token_address)?,
        start_block,
    }])
}

fn parse_address(var: &'static str, raw: &str) -> Result<EvmAddress, ConfigError> {
    EvmAddress::from_str(raw).map_err(|e| ConfigError::InvalidEnvVar {
        var,
        source: Box::new(e),
    })
}

fn invalid_env(
    var: &'static str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config resolution reads process-global env vars; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "CHAINS_CONFIG",
            "CHAIN_IDS",
            "RPC_URL",
            "TOKEN_ADDRESS",
            "START_BLOCK",
            "CHAIN_ID",
            "CHAIN_NAME",
        ] {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn legacy_fallback_uses_pulsechain_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let chains = resolve_chains().unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].chain_id, 369);
        assert_eq!(chains[0].chain_name, "PulseChain");
        assert_eq!(chains[0].start_block, 20326117);
        clear_all();
    }

    #[test]
    fn chain_ids_tier_reads_per_chain_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("CHAIN_IDS", "1,8453");
            std::env::set_var("CHAIN_1_RPC_URL", "http://rpc1");
            std::env::set_var(
                "CHAIN_1_TOKEN_ADDRESS",
                "0x7b39712Ef45F7dcED2bBDF11F3D5046bA61dA719",
            );
            std::env::set_var("CHAIN_8453_RPC_URL", "http://rpc8453");
            std::env::set_var(
                "CHAIN_8453_TOKEN_ADDRESS",
                "0x7b39712Ef45F7dcED2bBDF11F3D5046bA61dA719",
            );
            std::env::set_var("CHAIN_8453_START_BLOCK", "5");
        }
        let chains = resolve_chains().unwrap();
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().any(|c| c.chain_id == 1 && c.start_block == 0));
        assert!(chains.iter().any(|c| c.chain_id == 8453 && c.start_block == 5));
        clear_all();
        unsafe {
            for var in [
                "CHAIN_1_RPC_URL",
                "CHAIN_1_TOKEN_ADDRESS",
                "CHAIN_8453_RPC_URL",
                "CHAIN_8453_TOKEN_ADDRESS",
                "CHAIN_8453_START_BLOCK",
            ] {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn chains_config_json_tier_takes_priority() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var(
                "CHAINS_CONFIG",
                r#"[{"chain_id":1,"chain_name":"Ethereum","rpc_url":"http://rpc","token_address":"0x7b39712Ef45F7dcED2bBDF11F3D5046bA61dA719","start_block":0}]"#,
            );
        }
        let chains = resolve_chains().unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].chain_name, "Ethereum");
        clear_all();
    }
}
