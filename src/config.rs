//! Engine configuration
//!
//! Defaults suit tests and embedded use; deployments override through a
//! `rook.yaml` file or `ROOK__`-prefixed environment variables (for example
//! `ROOK__OUTBOX_BATCH_SIZE=128`).

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the timer sweep checks for due waits, in milliseconds.
    pub timer_poll_interval_ms: u64,
    /// How often pending outbox records are dispatched, in milliseconds.
    pub outbox_poll_interval_ms: u64,
    /// Maximum outbox records taken per dispatch round.
    pub outbox_batch_size: usize,
    /// Delivery attempts before an outbox record is marked failed.
    pub outbox_max_attempts: u32,
    /// Capacity of the in-memory event bus channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timer_poll_interval_ms: 25,
            outbox_poll_interval_ms: 25,
            outbox_batch_size: 32,
            outbox_max_attempts: 8,
            event_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Layer defaults, an optional `rook.yaml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::with_name("rook").format(FileFormat::Yaml).required(false))
            .add_source(Environment::with_prefix("ROOK").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timer_poll_interval_ms, 25);
        assert_eq!(config.outbox_batch_size, 32);
        assert_eq!(config.outbox_max_attempts, 8);
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn test_load_without_sources_yields_defaults() {
        let config = EngineConfig::load().expect("config loads");
        assert_eq!(config, EngineConfig::default());
    }
}
