//! Configuration file handling.
//!
//! This module loads and saves the vulngate configuration from a TOML file.
//! The scanning core never reads files itself; it receives a resolved
//! [`Config`].
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/vulngate/config.toml`
//! - macOS: `~/Library/Application Support/vulngate/config.toml`
//! - Windows: `%APPDATA%\vulngate\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! mode = "both"
//!
//! [ignore]
//! ids = ["CVE-2021-23337"]
//!
//! [ignore.packages.lodash]
//! ids = ["GHSA-35jh-r3h4-6jhm"]
//! until = "2027-01-01"
//! reason = "not reachable from our code"
//!
//! [osv]
//! batch = true
//! batch_retry = { max_attempts = 3, delay_ms = 1000 }
//!
//! [npm]
//! timeout_secs = 30
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ignore::IgnoreConfig;
use crate::retry::RetryConfig;

/// Which vulnerability sources a scan consults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Osv,
    Npm,
    #[default]
    Both,
}

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use vulngate::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Mode: {:?}", config.mode);
/// println!("OSV endpoint: {}", config.osv.base_url);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sources to query.
    ///
    /// Default: both
    pub mode: SourceMode,

    /// Suppression rules applied before advisories are reported.
    pub ignore: IgnoreConfig,

    pub osv: OsvSettings,

    pub npm: NpmSettings,
}

/// Retry budget for one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Initial backoff; grows by 1.5x per failed attempt.
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        RetryConfig::new(settings.max_attempts, settings.delay_ms)
    }
}

/// Settings for the OSV source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvSettings {
    pub base_url: String,

    /// Ecosystem sent with every query and used to filter `affected` entries.
    pub ecosystem: String,

    pub timeout_secs: u64,

    /// Use `/v1/querybatch` plus detail fetches instead of one query per package.
    pub batch: bool,

    pub batch_retry: RetrySettings,

    pub detail_retry: RetrySettings,
}

impl Default for OsvSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.osv.dev".to_string(),
            ecosystem: "npm".to_string(),
            timeout_secs: 30,
            batch: true,
            batch_retry: RetrySettings::default(),
            detail_retry: RetrySettings {
                max_attempts: 2,
                delay_ms: 500,
            },
        }
    }
}

/// Settings for the npm registry source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NpmSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry: RetrySettings,
}

impl Default for NpmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://registry.npmjs.org".to_string(),
            timeout_secs: 30,
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to the default config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use vulngate::Config;
    ///
    /// let path = Config::config_path();
    /// assert!(path.ends_with("vulngate/config.toml"));
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vulngate")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
