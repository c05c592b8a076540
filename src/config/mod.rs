//! Configuration management for depman
//!
//! Settings are loaded from `~/.depman/config.json` (or any path; a `.toml`
//! extension selects the TOML parser) with environment variable overrides.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{DepmanError, Result};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

impl Config {
    /// Returns the depman configuration directory path (~/.depman)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".depman")
    }

    /// Returns the path to the config file (~/.depman/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `DEPMAN_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(path, &content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let raw: serde_json::Value = if is_toml {
            toml::from_str(content)?
        } else {
            serde_json::from_str(content)?
        };

        for diagnostic in validate::validate_config(&raw) {
            tracing::warn!(path = %path.display(), "{}", diagnostic);
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: DEPMAN_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Logging
        if let Ok(val) = std::env::var("DEPMAN_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("DEPMAN_LOGGING_FORMAT") {
            match val.parse() {
                Ok(format) => self.logging.format = format,
                Err(e) => tracing::warn!("Ignoring DEPMAN_LOGGING_FORMAT: {}", e),
            }
        }
        if let Ok(val) = std::env::var("DEPMAN_LOGGING_FILE") {
            self.logging.file = if val.is_empty() { None } else { Some(val) };
        }

        // Engine
        if let Ok(val) = std::env::var("DEPMAN_ENGINE_ERROR_HISTORY") {
            if let Ok(v) = val.parse() {
                self.engine.error_history = v;
            }
        }
        if let Ok(val) = std::env::var("DEPMAN_ENGINE_REVERSE_SHUTDOWN") {
            if let Ok(v) = val.parse() {
                self.engine.reverse_shutdown = v;
            }
        }
        if let Ok(val) = std::env::var("DEPMAN_ENGINE_TRACE_TRANSITIONS") {
            if let Ok(v) = val.parse() {
                self.engine.trace_transitions = v;
            }
        }
    }

    /// Save configuration to a specific path as pretty JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Initialize the global configuration.
    ///
    /// This should be called once at startup. Subsequent calls will return
    /// an error if the config is already initialized.
    pub fn init() -> Result<()> {
        let config = Self::load()?;
        CONFIG
            .set(RwLock::new(config))
            .map_err(|_| DepmanError::Config("Configuration already initialized".to_string()))
    }

    /// Snapshot of the global configuration, or defaults if [`Config::init`]
    /// was never called.
    pub fn global() -> Config {
        CONFIG
            .get()
            .and_then(|lock| lock.read().ok().map(|c| c.clone()))
            .unwrap_or_default()
    }
}
