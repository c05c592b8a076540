//! Configuration type definitions for depman
//!
//! All types implement serde traits for JSON/TOML serialization and have
//! sensible defaults, so an empty or missing settings file is valid.

use serde::{Deserialize, Serialize};

/// Main settings struct for depman
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging output configuration
    pub logging: LoggingConfig,
    /// Lifecycle engine tuning
    pub engine: EngineConfig,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, coloured.
    Pretty,
    /// Compact single-line output with a `component` field.
    #[default]
    Component,
    /// Structured JSON lines for log aggregators.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "component" => Ok(LogFormat::Component),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Optional file to append log lines to (JSON format only).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Lifecycle engine configuration.
///
/// # Defaults
///
/// - `error_history`: 32 entries per component
/// - `reverse_shutdown`: `true`
/// - `trace_transitions`: `false`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many failures each component's error channel retains.
    pub error_history: usize,
    /// Tear components down in reverse-add order on manager shutdown.
    pub reverse_shutdown: bool,
    /// Emit a `debug` event for every dependency transition, not only state changes.
    pub trace_transitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_history: 32,
            reverse_shutdown: true,
            trace_transitions: false,
        }
    }
}
