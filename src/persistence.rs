use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::device_config::DeviceConfig;
use crate::error::PersistenceError;

/// `<config dir>/parksense/settings.json`
pub fn default_settings_path() -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config_dir.join("parksense").join("settings.json")
}

impl DeviceConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load from disk, or use defaults if the file is missing or unreadable
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no saved device config, using defaults");
            return Self::default();
        }

        match Self::load_from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded device config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load device config");
                Self::default()
            }
        }
    }

    /// Save configuration to a JSON file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
