//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the multiplexing client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection pool settings
    pub pool: PoolConfig,

    /// Settings for the `mux-stress` driver
    pub stress: StressConfig,
}

impl ClientConfig {
    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.pool.max_concurrent_streams == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection pool limits for one destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of physical connections
    pub max_connections: usize,

    /// Maximum number of live channels per connection
    pub max_concurrent_streams: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            max_concurrent_streams: 100,
        }
    }
}

/// Load driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Number of exchanges to issue
    pub exchanges: usize,

    /// How long a caller waits for a response before aborting its exchange
    #[serde(with = "duration_secs")]
    pub response_timeout: Duration,

    /// Close the pool after this many exchanges were dispatched
    pub close_after: Option<usize>,

    /// Artificial response delay of the loopback session
    #[serde(with = "duration_millis")]
    pub response_delay: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            exchanges: 1000,
            response_timeout: Duration::from_secs(10),
            close_after: None,
            response_delay: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [pool]
            max_connections = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_connections, 2);
        assert_eq!(config.pool.max_concurrent_streams, 100);
        assert_eq!(config.stress.exchanges, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = ClientConfig::default();
        config.pool.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ClientConfig::default();
        config.pool.max_concurrent_streams = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
