//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, reading, validating or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named file does not exist
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write configuration file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value parsed but is out of range
    #[error("Invalid configuration value for '{key}': {message}")]
    Invalid { key: String, message: String },

    /// An override variable could not be parsed
    #[error("Environment variable {var}={value:?} is invalid: {message}")]
    Env {
        var: String,
        value: String,
        message: String,
    },

    /// `save` was called on a loader that never had a file
    #[error("No configuration file path set")]
    NoPath,
}

impl ConfigError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env(var: impl Into<String>, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
