use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

// Serial port configuration
pub const BAUD_RATE: u32 = 115_200;
pub const SERIAL_TIMEOUT_MS: u64 = 100;

// Written once after the link opens, before any AT command
pub const HANDSHAKE: &str = "SWIOTT";

// Minimum gaps between the steps of multi-command exchanges
pub const INIT_GAP_MS: u64 = 300;
pub const QUERY_GAP_MS: u64 = 500;
pub const THRESHOLD_GAP_MS: u64 = 300;
pub const CONFIG_GAP_MS: u64 = 500;
pub const POLL_INTERVAL_MS: u64 = 10_000;

// Data buffer limits
pub const MAX_LOG_MESSAGES: usize = 200;
pub const REASSEMBLY_WARN_BYTES: usize = 4096;

/// Delays used by the command sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub init_gap_ms: u64,
    pub query_gap_ms: u64,
    pub threshold_gap_ms: u64,
    pub config_gap_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            init_gap_ms: INIT_GAP_MS,
            query_gap_ms: QUERY_GAP_MS,
            threshold_gap_ms: THRESHOLD_GAP_MS,
            config_gap_ms: CONFIG_GAP_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl Timing {
    pub fn init_gap(&self) -> Duration {
        Duration::from_millis(self.init_gap_ms)
    }

    pub fn query_gap(&self) -> Duration {
        Duration::from_millis(self.query_gap_ms)
    }

    pub fn threshold_gap(&self) -> Duration {
        Duration::from_millis(self.threshold_gap_ms)
    }

    pub fn config_gap(&self) -> Duration {
        Duration::from_millis(self.config_gap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: BAUD_RATE,
            timeout_ms: SERIAL_TIMEOUT_MS,
        }
    }
}

/// Complete application configuration.
///
/// Every field has a default, so a config file only needs the values it
/// wants to change:
///
/// ```toml
/// [serial]
/// port = "/dev/rfcomm0"
///
/// [timing]
/// poll_interval_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub timing: Timing,
    pub log_capacity: usize,
    /// Where the device configuration is saved after a sync. `None` disables saving.
    pub settings_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            timing: Timing::default(),
            log_capacity: MAX_LOG_MESSAGES,
            settings_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be at least 1".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be non-zero".into()));
        }
        let gaps = [
            ("init_gap_ms", self.timing.init_gap_ms, INIT_GAP_MS),
            ("query_gap_ms", self.timing.query_gap_ms, QUERY_GAP_MS),
            ("threshold_gap_ms", self.timing.threshold_gap_ms, THRESHOLD_GAP_MS),
            ("config_gap_ms", self.timing.config_gap_ms, CONFIG_GAP_MS),
        ];
        for (name, value, min) in gaps {
            if value < min {
                return Err(ConfigError::Invalid(format!(
                    "timing.{name} must be at least {min}, got {value}"
                )));
            }
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("timing.poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}
