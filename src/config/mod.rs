pub mod types;

pub use types::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Crate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Circuit breaker policy
    pub breaker: BreakerConfig,
    /// Temporary directory settings
    pub tempdir: TempDirConfig,
}

impl AppConfig {
    /// Load configuration from the default TOML file, or use defaults if not found
    pub fn load() -> Self {
        Self::load_or_default(&Self::config_path())
    }

    /// Load configuration from `config_path`, falling back to defaults when the
    /// file is missing or invalid
    pub fn load_or_default(config_path: &Path) -> Self {
        if config_path.exists() {
            match Self::load_from_file(config_path) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config: {}. Using defaults.", e);
                }
            }
        }

        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Load and validate configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mkdtemp-breaker")
            .join("config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.breaker.validate()
    }
}

impl BreakerConfig {
    /// Validate the breaker policy
    pub fn validate(&self) -> Result<()> {
        if self.error_threshold_percentage > 100 {
            return Err(Error::Config(
                "Error threshold percentage must be between 0 and 100".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("Timeout must be greater than zero".to_string()));
        }
        if self.reset_timeout_ms == 0 {
            return Err(Error::Config(
                "Reset timeout must be greater than zero".to_string(),
            ));
        }
        if self.rolling_count_buckets == 0 {
            return Err(Error::Config(
                "Rolling window needs at least one bucket".to_string(),
            ));
        }
        let buckets = u64::from(self.rolling_count_buckets);
        if self.rolling_count_timeout_ms < buckets || self.rolling_count_timeout_ms % buckets != 0 {
            return Err(Error::Config(format!(
                "Rolling window of {}ms cannot be divided evenly into {} buckets",
                self.rolling_count_timeout_ms, self.rolling_count_buckets
            )));
        }
        Ok(())
    }
}
