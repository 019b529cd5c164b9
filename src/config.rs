//! TOML configuration for [`crate::bin::cobusd`] (and any other host that
//! wants config-file-driven construction instead of hand-assembling a
//! [`crate::scheduler::SchedulerConfig`]).

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::scheduler::SchedulerConfig;

/// On-disk configuration, deserialized from TOML. Every field has a default,
/// so a config file only needs to override what differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue_capacity: usize,
    pub max_message_len: usize,
    pub stats_interval_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            max_message_len: defaults.max_message_len,
            stats_interval_us: defaults.stats_interval_us,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    /// Write the default configuration to `path`, for `cobusd init`.
    pub fn write_default(path: &str) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(&Self::default()).map_err(ConfigError::Serialize)?;
        std::fs::write(path, text).map_err(ConfigError::Read)
    }

    /// Reject configuration values that would make the scheduler unusable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_scheduler_config(self) -> SchedulerConfig {
        SchedulerConfig {
            queue_capacity: self.queue_capacity,
            max_message_len: self.max_message_len,
            stats_interval_us: self.stats_interval_us,
        }
    }
}

/// Errors raised loading or writing a [`Config`] file. Kept distinct from
/// [`crate::error::Error`] since these are I/O-adjacent, host-side failures
/// rather than scheduler invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("failed to serialize default config: {0}")]
    Serialize(#[source] toml::ser::Error),
}
