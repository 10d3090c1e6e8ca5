use thiserror::Error;

/// Failures reported by the byte channel to the sensor.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connection already in progress ({0})")]
    Busy(String),

    #[error("no device found: {0}")]
    NotFound(String),

    #[error("failed to open port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize settings: {0}")]
    Json(#[from] serde_json::Error),
}
