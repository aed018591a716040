pub mod config;

pub use config::{BridgeConfig, DEFAULT_CALL_TIMEOUT_MS};
