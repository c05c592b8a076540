//! Error types for depman
//!
//! This module defines all error types used throughout the engine.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Nothing in here ever crosses the `DependencyManager::add`/`remove`
//! boundary: failures are contained in the owning component, logged, and
//! recorded in its error channel (see [`ComponentError`]).

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Callback failures
// ============================================================================

/// A lifecycle or update method returned an error or panicked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("callback '{method}' failed: {message}")]
pub struct CallbackError {
    /// Name under which the method was resolved.
    pub method: String,
    /// Rendered failure (error chain or panic payload).
    pub message: String,
}

impl CallbackError {
    pub fn new(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for depman operations.
#[derive(Error, Debug)]
pub enum DepmanError {
    /// A lifecycle or update callback failed.
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// An explicitly configured callback name matched no method on its target.
    #[error("Resolution error: no method '{method}' on {target}")]
    Resolution { method: String, target: String },

    /// A dependency could not attach to its external source.
    #[error("Dependency start error: {0}")]
    DependencyStart(String),

    /// A service filter expression could not be parsed.
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Configuration-related errors (invalid settings file, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lookup misses (unknown component, service id, PID, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A harness-side wait gave up before the component reached the state.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML settings parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A specialized `Result` type for depman operations.
pub type Result<T> = std::result::Result<T, DepmanError>;

// ============================================================================
// Component error channel
// ============================================================================

/// Which of the engine's failure classes a recorded error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Callback,
    Resolution,
    DependencyStart,
}

/// One entry in a component's error channel.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentError {
    pub kind: ErrorKind,
    /// Lifecycle phase or dependency the failure happened in.
    pub origin: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ComponentError {
    pub fn new(kind: ErrorKind, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Build an entry from an engine error, classifying it by variant.
    pub fn from_error(origin: impl Into<String>, err: &DepmanError) -> Self {
        let kind = match err {
            DepmanError::Resolution { .. } => ErrorKind::Resolution,
            DepmanError::DependencyStart(_) => ErrorKind::DependencyStart,
            _ => ErrorKind::Callback,
        };
        Self::new(kind, origin, err.to_string())
    }
}
