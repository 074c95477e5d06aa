//! Strategy configuration surface.
//!
//! Recognized options mirror the external configuration names
//! (`bufferSize`, `subscriberCount`, `waitStrategy`, `maxConcurrency`).
//! Validation happens once at construction; an invalid value never reaches
//! the runtime path.

use serde::{Deserialize, Serialize};

use millrace_scheduler::WaitStrategy;

use crate::error::ConfigError;

/// Tuning knobs for ring-based processing strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Ring buffer capacity; must be a power of two
    #[serde(alias = "bufferSize")]
    pub buffer_size: usize,

    /// Number of ring subscriber threads
    #[serde(alias = "subscriberCount")]
    pub subscriber_count: usize,

    /// What a subscriber does while the ring is empty
    #[serde(alias = "waitStrategy")]
    pub wait_strategy: WaitStrategy,

    /// Maximum events concurrently inside the pipeline body. This bounds
    /// in-flight events, not threads; the two may differ.
    #[serde(alias = "maxConcurrency")]
    pub max_concurrency: usize,
}

impl StrategyConfig {
    /// Sentinel for "no concurrency bound".
    pub const UNBOUNDED: usize = usize::MAX;

    /// Validate the configuration, rejecting invalid values before any
    /// scheduling machinery is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 || !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::BufferSizeNotPowerOfTwo(self.buffer_size));
        }
        if self.subscriber_count == 0 {
            return Err(ConfigError::ZeroSubscribers);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroMaxConcurrency);
        }
        Ok(())
    }

    /// Whether a concurrency bound is configured at all.
    pub fn is_bounded(&self) -> bool {
        self.max_concurrency != Self::UNBOUNDED
    }

    /// Set the buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the subscriber count.
    pub fn with_subscriber_count(mut self, subscriber_count: usize) -> Self {
        self.subscriber_count = subscriber_count;
        self
    }

    /// Set the wait strategy.
    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategy) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            subscriber_count: 1,
            wait_strategy: WaitStrategy::default(),
            max_concurrency: Self::UNBOUNDED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StrategyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.subscriber_count, 1);
        assert!(!config.is_bounded());
    }

    #[test]
    fn test_non_power_of_two_buffer_rejected() {
        let config = StrategyConfig::default().with_buffer_size(10);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::BufferSizeNotPowerOfTwo(10)));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(matches!(
            StrategyConfig::default().with_buffer_size(0).validate(),
            Err(ConfigError::BufferSizeNotPowerOfTwo(0))
        ));
        assert!(matches!(
            StrategyConfig::default().with_subscriber_count(0).validate(),
            Err(ConfigError::ZeroSubscribers)
        ));
        assert!(matches!(
            StrategyConfig::default().with_max_concurrency(0).validate(),
            Err(ConfigError::ZeroMaxConcurrency)
        ));
    }

    #[test]
    fn test_max_concurrency_of_one_is_valid() {
        // 1 means fully sequential, not invalid.
        let config = StrategyConfig::default().with_max_concurrency(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserializes_external_names() {
        let config: StrategyConfig = serde_json::from_str(
            r#"{"bufferSize": 8, "subscriberCount": 2, "waitStrategy": "busySpin", "maxConcurrency": 4}"#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.subscriber_count, 2);
        assert_eq!(config.wait_strategy, WaitStrategy::BusySpin);
        assert_eq!(config.max_concurrency, 4);
    }
}
