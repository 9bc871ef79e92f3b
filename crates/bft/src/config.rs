//! BFT configuration.

use std::time::Duration;
use thiserror::Error;

/// Maximum exponent for round-timeout backoff (2^6 = 64x base with the default multiplier).
pub const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Rounds ahead of the local round for which messages are kept.
pub const MAX_ROUND_LOOKAHEAD: u64 = 64;

/// Configuration rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("period_size must be at least 1")]
    ZeroPeriodSize,

    #[error("epoch_size {epoch_size} must be a positive multiple of period_size {period_size}")]
    EpochSizeNotMultiple { epoch_size: u64, period_size: u64 },

    #[error("round_timeout_multiplier must be at least 1, got {0}")]
    MultiplierTooSmall(u32),

    #[error("retry max_attempts must be at least 1")]
    ZeroRetryAttempts,
}

/// Bounded retry for chain reads that may race a lagging backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Exactly one attempt, no waiting.
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

/// BFT consensus configuration.
///
/// Process-wide and immutable after startup. Call [`BftConfig::validate`]
/// before handing it to the state machine.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Blocks per period (sprint).
    pub period_size: u64,

    /// Blocks per scheduled epoch. A multiple of `period_size`.
    pub epoch_size: u64,

    /// Delay between entering a height and the proposer building its block.
    pub block_interval: Duration,

    /// Round-0 timeout.
    pub round_timeout: Duration,

    /// Base of the exponential round-timeout backoff.
    pub round_timeout_multiplier: u32,

    /// Maximum transactions per block.
    pub max_transactions_per_block: usize,

    /// Maximum messages held for the next height.
    pub max_buffered_messages: usize,

    /// Retry policy for chain reads.
    pub retry: RetryPolicy,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            period_size: 4,
            epoch_size: 32,
            block_interval: Duration::from_millis(200),
            round_timeout: Duration::from_secs(2),
            round_timeout_multiplier: 2,
            max_transactions_per_block: 4096,
            max_buffered_messages: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl BftConfig {
    /// Create a new BFT configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the period size.
    pub fn with_period_size(mut self, period_size: u64) -> Self {
        self.period_size = period_size;
        self
    }

    /// Set the scheduled epoch length.
    pub fn with_epoch_size(mut self, epoch_size: u64) -> Self {
        self.epoch_size = epoch_size;
        self
    }

    /// Set the block interval.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    /// Set the round-0 timeout.
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    /// Set the maximum transactions per block.
    pub fn with_max_transactions(mut self, max: usize) -> Self {
        self.max_transactions_per_block = max;
        self
    }

    /// Set the chain-read retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_size == 0 {
            return Err(ConfigError::ZeroPeriodSize);
        }
        if self.epoch_size == 0 || self.epoch_size % self.period_size != 0 {
            return Err(ConfigError::EpochSizeNotMultiple {
                epoch_size: self.epoch_size,
                period_size: self.period_size,
            });
        }
        if self.round_timeout_multiplier < 1 {
            return Err(ConfigError::MultiplierTooSmall(self.round_timeout_multiplier));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        Ok(())
    }

    /// Timeout for `round`: `round_timeout * multiplier^min(round, MAX_BACKOFF_EXPONENT)`.
    pub fn timeout_for_round(&self, round: u64) -> Duration {
        let exponent = round.min(MAX_BACKOFF_EXPONENT as u64) as u32;
        let factor = self.round_timeout_multiplier.saturating_pow(exponent);
        self.round_timeout.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(BftConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = BftConfig::default().with_period_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPeriodSize));
    }

    #[test]
    fn test_epoch_must_be_multiple_of_period() {
        let config = BftConfig::default().with_period_size(4).with_epoch_size(10);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EpochSizeNotMultiple { .. })
        ));
        let config = BftConfig::default().with_period_size(4).with_epoch_size(12);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_timeout_backoff_is_capped() {
        let config = BftConfig::default().with_round_timeout(Duration::from_millis(100));
        assert_eq!(config.timeout_for_round(0), Duration::from_millis(100));
        assert_eq!(config.timeout_for_round(1), Duration::from_millis(200));
        assert_eq!(config.timeout_for_round(3), Duration::from_millis(800));
        assert_eq!(config.timeout_for_round(6), Duration::from_millis(6_400));
        assert_eq!(config.timeout_for_round(50), Duration::from_millis(6_400));
    }
}
