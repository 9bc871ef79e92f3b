//! TOML node configuration.
//!
//! # Example
//!
//! ```toml
//! [node]
//! event_channel_capacity = 10000
//!
//! [consensus]
//! period_size = 4
//! epoch_size = 32
//! block_interval_ms = 200
//! round_timeout_ms = 2000
//!
//! [devnet]
//! validators = 4
//! blocks = 10
//!
//! [telemetry]
//! log_level = "info,favo_bft=debug"
//! json = false
//! ```
//!
//! Every section and every field is optional.

use crate::telemetry::TelemetryConfig;
use favo_bft::{BftConfig, ConfigError, RetryPolicy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid consensus configuration: {0}")]
    Consensus(#[from] ConfigError),

    #[error("devnet needs at least one validator")]
    NoValidators,

    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub devnet: DevnetSection,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Per-node runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Capacity of each node's inbound message channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the finalized-block notification channel.
    #[serde(default = "default_finalized_channel_capacity")]
    pub finalized_channel_capacity: usize,
}

fn default_event_channel_capacity() -> usize {
    10_000
}

fn default_finalized_channel_capacity() -> usize {
    256
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            finalized_channel_capacity: default_finalized_channel_capacity(),
        }
    }
}

/// Consensus parameters. Mirrors [`BftConfig`] with millisecond durations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusSection {
    #[serde(default = "default_period_size")]
    pub period_size: u64,

    #[serde(default = "default_epoch_size")]
    pub epoch_size: u64,

    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,

    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,

    #[serde(default = "default_round_timeout_multiplier")]
    pub round_timeout_multiplier: u32,

    #[serde(default = "default_max_transactions_per_block")]
    pub max_transactions_per_block: usize,

    #[serde(default = "default_max_buffered_messages")]
    pub max_buffered_messages: usize,

    /// Chain read attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_period_size() -> u64 {
    BftConfig::default().period_size
}

fn default_epoch_size() -> u64 {
    BftConfig::default().epoch_size
}

fn default_block_interval_ms() -> u64 {
    BftConfig::default().block_interval.as_millis() as u64
}

fn default_round_timeout_ms() -> u64 {
    BftConfig::default().round_timeout.as_millis() as u64
}

fn default_round_timeout_multiplier() -> u32 {
    BftConfig::default().round_timeout_multiplier
}

fn default_max_transactions_per_block() -> usize {
    BftConfig::default().max_transactions_per_block
}

fn default_max_buffered_messages() -> usize {
    BftConfig::default().max_buffered_messages
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_retry_delay_ms() -> u64 {
    RetryPolicy::default().delay.as_millis() as u64
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            period_size: default_period_size(),
            epoch_size: default_epoch_size(),
            block_interval_ms: default_block_interval_ms(),
            round_timeout_ms: default_round_timeout_ms(),
            round_timeout_multiplier: default_round_timeout_multiplier(),
            max_transactions_per_block: default_max_transactions_per_block(),
            max_buffered_messages: default_max_buffered_messages(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Local in-process network settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevnetSection {
    /// Number of validators, all in the genesis set with power 1.
    #[serde(default = "default_validators")]
    pub validators: usize,

    /// Stop after this many blocks are finalized on every node.
    #[serde(default = "default_blocks")]
    pub blocks: u64,

    /// Seed for validator keys. Same seed, same addresses.
    #[serde(default)]
    pub seed: u64,

    /// Transactions placed in every mempool before start.
    #[serde(default)]
    pub transactions: usize,

    /// Give up if the target is not reached in time.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_validators() -> usize {
    4
}

fn default_blocks() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for DevnetSection {
    fn default() -> Self {
        Self {
            validators: default_validators(),
            blocks: default_blocks(),
            seed: 0,
            transactions: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file. Does not validate.
    pub fn load(path: &Path) -> Result<Self, NodeConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| NodeConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| NodeConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Consensus section as a validated [`BftConfig`].
    pub fn bft_config(&self) -> Result<BftConfig, NodeConfigError> {
        let c = &self.consensus;
        let config = BftConfig {
            period_size: c.period_size,
            epoch_size: c.epoch_size,
            block_interval: Duration::from_millis(c.block_interval_ms),
            round_timeout: Duration::from_millis(c.round_timeout_ms),
            round_timeout_multiplier: c.round_timeout_multiplier,
            max_transactions_per_block: c.max_transactions_per_block,
            max_buffered_messages: c.max_buffered_messages,
            retry: RetryPolicy {
                max_attempts: c.retry_attempts,
                delay: Duration::from_millis(c.retry_delay_ms),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.bft_config()?;
        if self.devnet.validators == 0 {
            return Err(NodeConfigError::NoValidators);
        }
        if self.node.event_channel_capacity == 0 {
            return Err(NodeConfigError::ZeroCapacity("event_channel_capacity"));
        }
        if self.node.finalized_channel_capacity == 0 {
            return Err(NodeConfigError::ZeroCapacity("finalized_channel_capacity"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_config("");
        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config, NodeConfig::default());

        let bft = config.bft_config().unwrap();
        let defaults = BftConfig::default();
        assert_eq!(bft.period_size, defaults.period_size);
        assert_eq!(bft.epoch_size, defaults.epoch_size);
        assert_eq!(bft.block_interval, defaults.block_interval);
        assert_eq!(bft.retry, defaults.retry);
    }

    #[test]
    fn test_sections_override_defaults() {
        let file = write_config(
            r#"
            [consensus]
            period_size = 2
            epoch_size = 8
            block_interval_ms = 50
            round_timeout_ms = 500

            [devnet]
            validators = 7
            blocks = 3
            seed = 9

            [telemetry]
            json = true
            "#,
        );
        let config = NodeConfig::load(file.path()).unwrap();
        config.validate().unwrap();

        let bft = config.bft_config().unwrap();
        assert_eq!(bft.period_size, 2);
        assert_eq!(bft.epoch_size, 8);
        assert_eq!(bft.block_interval, Duration::from_millis(50));
        assert_eq!(bft.round_timeout, Duration::from_millis(500));
        assert_eq!(config.devnet.validators, 7);
        assert_eq!(config.devnet.seed, 9);
        assert!(config.telemetry.json);
        assert_eq!(config.node, NodeSection::default());
    }

    #[test]
    fn test_epoch_not_multiple_of_period_rejected() {
        let file = write_config("[consensus]\nperiod_size = 3\nepoch_size = 10\n");
        let config = NodeConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.validate(),
            Err(NodeConfigError::Consensus(ConfigError::EpochSizeNotMultiple { .. }))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = write_config("[consensus]\nview_change_timeout_ms = 10\n");
        assert!(matches!(
            NodeConfig::load(file.path()),
            Err(NodeConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            NodeConfig::load(&path),
            Err(NodeConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_zero_validators_rejected() {
        let file = write_config("[devnet]\nvalidators = 0\n");
        let config = NodeConfig::load(file.path()).unwrap();
        assert!(matches!(config.validate(), Err(NodeConfigError::NoValidators)));
    }
}
