//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// API endpoint used when neither the flag, the environment nor the config
/// file names one
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Thresholds file used when none is given on the command line
pub const DEFAULT_THRESHOLDS_PATH: &str = "config/thresholds.json";

/// CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Default thresholds file for `thresholds` commands
    pub thresholds_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("adaptctl").join("config.json"))
    }

    /// API URL from the command line or environment, else the file, else the default
    pub fn resolve_api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn resolve_thresholds_path(&self, arg: Option<PathBuf>) -> PathBuf {
        arg.or_else(|| self.thresholds_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_THRESHOLDS_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let config = Config {
            api_url: Some("http://edge-1:8080".to_string()),
            thresholds_path: None,
        };

        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_resolution_order() {
        let config = Config {
            api_url: Some("http://from-file:8080".to_string()),
            thresholds_path: None,
        };

        assert_eq!(
            config.resolve_api_url(Some("http://from-flag:9090".to_string())),
            "http://from-flag:9090"
        );
        assert_eq!(config.resolve_api_url(None), "http://from-file:8080");
        assert_eq!(Config::default().resolve_api_url(None), DEFAULT_API_URL);
        assert_eq!(
            Config::default().resolve_thresholds_path(None),
            PathBuf::from(DEFAULT_THRESHOLDS_PATH)
        );
    }
}
