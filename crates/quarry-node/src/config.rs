//! Miner configuration.
//!
//! [`MinerConfig`] is layered from built-in defaults, an optional TOML file
//! and `QUARRY__*` environment variables (`QUARRY__POW__THREADS=4`), in that
//! order. CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use quarry_consensus::PowConfig;
use quarry_core::constants::ChainConfig;
use quarry_core::types::Address;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "QUARRY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Chain preset: `mainnet` or `dev`.
    pub chain: String,
    /// Address credited with block rewards and fees.
    pub beneficiary: Address,
    /// Gas limit stamped on candidate blocks.
    pub gas_limit: u64,
    /// Extra data stamped on candidate blocks (UTF-8, at most 32 bytes).
    pub extra_data: String,
    /// Most transactions considered per candidate.
    pub max_block_transactions: usize,
    /// Seal blocks even when the pool has nothing to include.
    pub allow_empty_blocks: bool,
    /// Wait between polls for a seal result.
    pub poll_interval_ms: u64,
    /// Sleep when there is nothing to mine.
    pub idle_backoff_ms: u64,
    pub pow: PowConfig,
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            chain: "dev".into(),
            beneficiary: Address::ZERO,
            gas_limit: 8_000_000,
            extra_data: String::new(),
            max_block_transactions: 512,
            allow_empty_blocks: false,
            poll_interval_ms: 250,
            idle_backoff_ms: 1_000,
            pow: PowConfig::default(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl MinerConfig {
    /// `<config_dir>/quarry/miner.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("quarry").join("miner.toml"))
    }

    /// Load from `path` (must exist) or the default path (optional), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                if let Some(default) = Self::default_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }
        let loaded: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings that would produce invalid candidates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chain = self.chain_config()?;
        if self.extra_data.len() > chain.params.max_extra_data_size {
            return Err(ConfigError::Message(format!(
                "extra_data is {} bytes, at most {} allowed",
                self.extra_data.len(),
                chain.params.max_extra_data_size
            )));
        }
        if self.gas_limit > chain.params.max_gas_limit {
            return Err(ConfigError::Message(format!("gas_limit {} exceeds protocol maximum", self.gas_limit)));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(ConfigError::Message(format!("unknown log_format {:?}", self.log_format)));
        }
        Ok(())
    }

    /// Chain settings for the selected preset, with this config's gas limit.
    pub fn chain_config(&self) -> Result<ChainConfig, ConfigError> {
        let mut chain = ChainConfig::preset(&self.chain)
            .ok_or_else(|| ConfigError::Message(format!("unknown chain preset {:?}", self.chain)))?;
        chain.gas_limit = self.gas_limit;
        Ok(chain)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}
