//! Error types for the resilient transport
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use crate::types::Suspension;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the resilient transport
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Transport Errors
    // ============================================================================
    /// DNS, connect, TLS or protocol failure from the underlying HTTP stack.
    /// Never retried by this crate.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Circuit open after {failures} consecutive server failures, retry in {cooldown:?}")]
    CircuitOpen { failures: u32, cooldown: Duration },

    #[error("Interrupted during {during}")]
    Interrupted { during: Suspension },

    #[error("Request cancelled")]
    Cancelled,

    // ============================================================================
    // Request Body Errors
    // ============================================================================
    #[error("Failed to buffer request body: {0}")]
    BodyBuffer(#[source] reqwest::Error),

    #[error("Request cannot be replayed")]
    NotReplayable,

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid header error
    pub fn invalid_header(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an interruption error for the given suspension point
    pub fn interrupted(during: Suspension) -> Self {
        Self::Interrupted { during }
    }

    /// True when a cancellation signal fired during a wait or backoff sleep
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }

    /// True for the synthetic fail-fast error
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }

    /// True when the caller's cancellation signal ended the operation,
    /// whether mid-sleep or during network I/O
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Interrupted { .. } | Error::Cancelled)
    }
}

/// Result type alias for the resilient transport
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
