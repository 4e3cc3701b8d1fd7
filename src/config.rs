use std::path::Path;
use std::time::Duration;

use crate::observer::ObserverConfig;
use crate::pipeline::dispatch::DEFAULT_IGNORED_LEVELS;

/// Tuning read from the TOML config file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogwatchConfig {
    /// Milliseconds to wait before tailing a container created while running.
    #[serde(default = "default_new_container_delay_ms")]
    pub new_container_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Entries at these levels are not sent to any recorder.
    #[serde(default = "default_ignored_levels")]
    pub ignored_levels: Vec<String>,
    /// Record lines that are not structured JSON as plain messages instead
    /// of dropping them.
    #[serde(default)]
    pub raw_fallback: bool,
}

fn default_new_container_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_ignored_levels() -> Vec<String> {
    DEFAULT_IGNORED_LEVELS.iter().map(|level| level.to_string()).collect()
}

impl Default for LogwatchConfig {
    fn default() -> Self {
        Self {
            new_container_delay_ms: default_new_container_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ignored_levels: default_ignored_levels(),
            raw_fallback: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LogwatchConfig {
    pub fn try_init_from_string(val: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(val)?)
    }

    /// A missing file means defaults.
    pub fn try_init(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(config) => Self::try_init_from_string(&config),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config file at {path:?}, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn observer(&self) -> ObserverConfig {
        ObserverConfig {
            new_container_delay: Duration::from_millis(self.new_container_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}
