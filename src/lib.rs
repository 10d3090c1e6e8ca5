pub mod app;
pub mod config;
pub mod device_config;
pub mod error;
pub mod framing;
pub mod parser;
pub mod persistence;
pub mod protocol;
pub mod sequencer;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod uart;

pub use app::Session;
pub use config::AppConfig;
pub use error::TransportError;
