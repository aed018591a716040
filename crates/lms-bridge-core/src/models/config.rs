//! Bridge configuration

use crate::frame::serialized_origin;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2000;

/// Configuration shared by the LMS page and the bridge tooling.
///
/// Field names follow the JSON config the LMS backend embeds in the page, so
/// the same blob can be fed to [`BridgeConfig::from_page_config`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Exact origins the RPC server accepts messages from
    pub rpc_allowed_origins: Vec<String>,
    pub call_timeout_ms: u64,
    pub log_level: String,
}

impl BridgeConfig {
    /// Parse the JSON configuration embedded in the hosting page.
    ///
    /// Keys unrelated to the bridge are ignored.
    pub fn from_page_config(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for origin in &self.rpc_allowed_origins {
            match serialized_origin(origin) {
                Ok(serialized) if serialized == *origin => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "Invalid allowed origin '{}'. Expected scheme://host[:port]",
                        origin
                    )));
                }
            }
        }

        if self.call_timeout_ms == 0 {
            return Err(Error::Validation(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        const MAX_TIMEOUT_MS: u64 = 60_000;
        if self.call_timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::Validation(format!(
                "Call timeout too long (max {} ms)",
                MAX_TIMEOUT_MS
            )));
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                valid_log_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rpc_allowed_origins: Vec::new(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            log_level: "info".to_string(),
        }
    }
}
