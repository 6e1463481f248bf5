//! Configuration file handling
//!
//! Harness defaults (per-test timeout, report options) can be loaded from a
//! TOML file. Every section and field is optional; an absent file yields the
//! built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Report rendering settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Default per-test timeout
    #[serde(default = "default_test_ms")]
    pub test_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            test_ms: default_test_ms(),
        }
    }
}

fn default_test_ms() -> u64 {
    5000
}

/// Report rendering configuration
#[derive(Debug, Deserialize, Default)]
pub struct ReportConfig {
    /// Include captured panic traces in the textual report
    #[serde(default)]
    pub include_traces: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Default per-test timeout as a `Duration`
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.test_ms)
    }
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/steploop/`
/// - macOS: `~/Library/Application Support/steploop/`
/// - Windows: `%APPDATA%\steploop\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "steploop")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.test_ms, 5000);
        assert!(!config.report.include_traces);
        assert_eq!(config.test_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [timeouts]
            test_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.test_ms, 250);
        assert!(!config.report.include_traces);
    }

    #[test]
    fn test_config_dir_is_valid() {
        assert!(config_dir().is_some());
    }
}
