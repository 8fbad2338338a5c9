//! Error types for serial bridge operations.
//!
//! Every failing driver call is turned into a [`SerialError`] at the call
//! adapter boundary and handed straight back to the caller. Nothing is
//! retried or swallowed here.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A specialized `Result` type for serial bridge operations.
pub type Result<T> = std::result::Result<T, SerialError>;

/// The driver's last-error state, captured right after a failing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// OS-level error code reported by the driver.
    pub code: i32,
    /// Human-readable message reported by the driver.
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Errors that can occur while talking to a serial device.
#[derive(Debug, Error)]
pub enum SerialError {
    /// A driver call returned a negative status.
    #[error("Native call failed: {message} (code {code})")]
    NativeCall { code: i32, message: String },

    /// The queried attribute or operation does not apply to this device.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Illegal lifecycle transition, e.g. a second subscriber or use after dispose.
    #[error("Invalid state: {0}")]
    State(String),

    /// The background reader ended because the device errored.
    #[error("Reader terminated: {0}")]
    ReaderTerminated(ErrorRecord),

    /// An I/O error outside the driver surface.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task used for async I/O panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    TaskJoin(String),
}

impl SerialError {
    /// Create a State error from a message.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create a NotSupported error naming the attribute or operation.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// The captured driver error record, if this error carries one.
    pub fn record(&self) -> Option<ErrorRecord> {
        match self {
            Self::NativeCall { code, message } => Some(ErrorRecord::new(*code, message.clone())),
            Self::ReaderTerminated(record) => Some(record.clone()),
            _ => None,
        }
    }
}

impl From<ErrorRecord> for SerialError {
    fn from(record: ErrorRecord) -> Self {
        Self::NativeCall {
            code: record.code,
            message: record.message,
        }
    }
}

impl From<tokio::task::JoinError> for SerialError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SerialError::NativeCall {
            code: 5,
            message: "Input/output error".into(),
        };
        assert_eq!(err.to_string(), "Native call failed: Input/output error (code 5)");

        let err = SerialError::state("port handle already disposed");
        assert_eq!(err.to_string(), "Invalid state: port handle already disposed");

        let err = SerialError::not_supported("usb vendor id");
        assert_eq!(err.to_string(), "Not supported: usb vendor id");
    }

    #[test]
    fn test_record_roundtrip_through_error() {
        let record = ErrorRecord::new(-2, "device gone");
        let err: SerialError = record.clone().into();
        assert_eq!(err.record(), Some(record));
        assert!(SerialError::state("x").record().is_none());
    }
}
