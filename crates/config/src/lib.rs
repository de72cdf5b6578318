//! App chain configuration
//!
//! Settings for one chain instance. The root chain and every app chain each
//! get their own `ProtocolSettings`; an app chain is identified by a non-zero
//! `chain_hash`.

use appchain_core::{PublicKey, UInt256};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Blockchain timing constants
pub const SECONDS_PER_BLOCK: u64 = 15;

/// Default block and pool limits
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 500;
pub const MEMORY_POOL_MAX_TRANSACTIONS: usize = 50_000;

/// Timestamp of the genesis block (2016-07-15T15:08:21Z)
pub const GENESIS_TIMESTAMP: u32 = 1_468_595_301;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has an unusable value.
    #[error("Invalid setting `{field}`: {message}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Protocol-level settings shared by every node of one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Network magic.
    pub magic: u32,
    /// Zero for the root chain, otherwise the app chain's registration hash.
    pub chain_hash: UInt256,
    /// Human readable chain name, used in logs.
    pub name: String,
    /// Validators used until the ledger records a different set.
    pub standby_validators: Vec<PublicKey>,
    /// Seed peers, `host:port`.
    pub seed_list: Vec<String>,
    pub seconds_per_block: u64,
    pub max_transactions_per_block: usize,
    pub memory_pool_max_transactions: usize,
    pub genesis_timestamp: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            magic: 0x0074_6E41,
            chain_hash: UInt256::zero(),
            name: "root".to_string(),
            standby_validators: Vec::new(),
            seed_list: Vec::new(),
            seconds_per_block: SECONDS_PER_BLOCK,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            memory_pool_max_transactions: MEMORY_POOL_MAX_TRANSACTIONS,
            genesis_timestamp: GENESIS_TIMESTAMP,
        }
    }
}

impl ProtocolSettings {
    /// Parses and validates settings from TOML.
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.standby_validators.is_empty() {
            return Err(ConfigError::invalid(
                "standby_validators",
                "at least one validator is required",
            ));
        }
        if self.seconds_per_block == 0 {
            return Err(ConfigError::invalid("seconds_per_block", "must be positive"));
        }
        if self.max_transactions_per_block == 0 {
            return Err(ConfigError::invalid(
                "max_transactions_per_block",
                "must be positive",
            ));
        }
        if self.memory_pool_max_transactions == 0 {
            return Err(ConfigError::invalid(
                "memory_pool_max_transactions",
                "must be positive",
            ));
        }
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.chain_hash.is_zero()
    }

    pub fn time_per_block(&self) -> Duration {
        Duration::from_secs(self.seconds_per_block)
    }
}

/// Logging output options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info,appchain_consensus=debug`.
    pub filter: String,
    /// Emit JSON lines instead of human readable text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Per-node settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub protocol: ProtocolSettings,
    pub logging: LoggingSettings,
    /// Run the consensus service when the node key is a validator.
    pub consensus_enabled: bool,
}

impl NodeSettings {
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(input)?;
        settings.protocol.validate()?;
        Ok(settings)
    }
}
