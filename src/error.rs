//! Error types and handling for Helios
//!
//! This module defines the error types used throughout the arbiter,
//! providing consistent error handling and reporting. Control-path
//! errors follow a small fixed taxonomy so callers can decide between
//! retry, abandonment and escalation.

use thiserror::Error;

/// Result type alias for Helios operations
pub type Result<T> = std::result::Result<T, HeliosError>;

/// Main error type for Helios
#[derive(Debug, Error)]
pub enum HeliosError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Bad index or argument
    #[error("Out of range: {message}")]
    OutOfRange { message: String },

    /// Collaborator is not registered or has gone away
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Called before start-up completed; recoverable by retry
    #[error("Not ready: {message}")]
    NotReady { message: String },

    /// Collaborator I/O failure (busy/would-block); retried with backoff
    #[error("Transient error: {message}")]
    Transient { message: String },

    /// Bounded wait exceeded; aborts the current attempt only
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Configuration invariant violated; the arbiter stays disabled
    #[error("Fatal error: {message}")]
    Fatal { message: String },
}

impl HeliosError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HeliosError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HeliosError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HeliosError::Io {
            message: message.into(),
        }
    }

    /// Create a new out-of-range error
    pub fn out_of_range<S: Into<String>>(message: S) -> Self {
        HeliosError::OutOfRange {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        HeliosError::NotFound {
            message: message.into(),
        }
    }

    /// Create a new not-ready error
    pub fn not_ready<S: Into<String>>(message: S) -> Self {
        HeliosError::NotReady {
            message: message.into(),
        }
    }

    /// Create a new transient error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        HeliosError::Transient {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HeliosError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new fatal error
    pub fn fatal<S: Into<String>>(message: S) -> Self {
        HeliosError::Fatal {
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying on the same path.
    ///
    /// Transient and not-ready failures clear on their own; everything
    /// else needs a different decision from the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HeliosError::Transient { .. } | HeliosError::NotReady { .. }
        )
    }
}

impl From<std::io::Error> for HeliosError {
    fn from(err: std::io::Error) -> Self {
        HeliosError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HeliosError {
    fn from(err: serde_yaml::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HeliosError {
    fn from(err: serde_json::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}
