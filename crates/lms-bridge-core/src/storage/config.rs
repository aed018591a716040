//! Configuration storage operations

use crate::{models::BridgeConfig, Result};
use std::path::{Path, PathBuf};

pub struct ConfigStorage {
    config_dir: PathBuf,
}

impl ConfigStorage {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn load(&self) -> Result<BridgeConfig> {
        let config_path = self.path();

        if !config_path.exists() {
            let config = BridgeConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        Self::load_file(&config_path)
    }

    /// Load a config file without touching the filesystem otherwise.
    ///
    /// An empty file yields the default config.
    pub fn load_file(path: &Path) -> Result<BridgeConfig> {
        let content = std::fs::read_to_string(path)?;

        if content.trim().is_empty() {
            return Ok(BridgeConfig::default());
        }

        let config: BridgeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &BridgeConfig) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.path(), content)?;

        Ok(())
    }
}
