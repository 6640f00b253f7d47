//! Reactor, pump and transport configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Top-level configuration for a selnet node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Address the server listens on / the client connects to
    pub bind_address: String,

    /// Demultiplexer settings
    pub reactor: ReactorConfig,

    /// Event queue and pump settings
    pub pump: PumpConfig,

    /// Per-connection buffer settings
    pub transport: TransportConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7400".to_string(),
            reactor: ReactorConfig::default(),
            pump: PumpConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl NetConfig {
    /// Reject values the reactor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reactor.select_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "reactor.select_timeout must be greater than zero".into(),
            ));
        }
        if self.reactor.events_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reactor.events_capacity must be greater than zero".into(),
            ));
        }
        if self.pump.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pump.batch_size must be greater than zero".into(),
            ));
        }
        if self.pump.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "pump.queue_capacity must be greater than zero when set".into(),
            ));
        }
        if self.transport.read_chunk_size == 0
            || self.transport.read_chunk_size > self.transport.receive_buffer_limit
        {
            return Err(ConfigError::Invalid(format!(
                "transport.read_chunk_size must be in 1..={}",
                self.transport.receive_buffer_limit
            )));
        }
        Ok(())
    }
}

/// Demultiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Upper bound of one readiness wait
    #[serde(with = "duration_millis")]
    pub select_timeout: Duration,

    /// How long `shutdown` waits for the loop thread to exit
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Readiness events collected per wait
    pub events_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            select_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(5),
            events_capacity: 1024,
        }
    }
}

/// Event queue and pump configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Maximum events handled per refresh
    pub batch_size: usize,

    /// Bound on queued events; unbounded when absent
    pub queue_capacity: Option<usize>,

    /// Sleep between refresh rounds that found nothing to do
    #[serde(with = "duration_millis")]
    pub idle_sleep: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            queue_capacity: None,
            idle_sleep: Duration::from_millis(5),
        }
    }
}

/// Per-connection buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Receive buffer size at which reads stop and overflow is reported
    pub receive_buffer_limit: usize,

    /// Bytes requested per read call
    pub read_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_buffer_limit: 1024 * 1024,
            read_chunk_size: 16 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.reactor.select_timeout, Duration::from_millis(500));
        assert_eq!(config.pump.queue_capacity, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NetConfig = toml::from_str(
            r#"
            bind_address = "0.0.0.0:9000"

            [reactor]
            select_timeout = 100

            [pump]
            queue_capacity = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.reactor.select_timeout, Duration::from_millis(100));
        assert_eq!(config.reactor.events_capacity, 1024);
        assert_eq!(config.pump.queue_capacity, Some(32));
        assert_eq!(config.pump.batch_size, 64);
        assert_eq!(config.transport.read_chunk_size, 16 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = NetConfig::default();
        config.pump.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        let mut config = NetConfig::default();
        config.transport.read_chunk_size = config.transport.receive_buffer_limit + 1;
        assert!(config.validate().is_err());
    }
}
