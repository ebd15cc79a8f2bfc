//! Error types and handling for Voltbridge
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Voltbridge operations
pub type Result<T> = std::result::Result<T, VoltbridgeError>;

/// Main error type for Voltbridge
#[derive(Debug, Error)]
pub enum VoltbridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network/timeout/HTTP failures talking to the controller. Always
    /// recoverable; the scheduler retries or falls back to polling.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Payload shape that neither wire format can explain. The caller skips
    /// the cycle and keeps the last good snapshot.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Two external ids resolved to the same internal unit number. The
    /// conflicting record is treated as orphaned until manually fixed.
    #[error("Identity conflict: unit {unit} claimed by both '{existing}' and '{incoming}'")]
    IdentityConflict {
        unit: u32,
        existing: String,
        incoming: String,
    },

    /// Controller rejected a command write; the local device keeps showing
    /// the last confirmed controller state.
    #[error("Command rejected by controller: {message}")]
    CommandRejected { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Authentication/authorization errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },
}

impl VoltbridgeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Transport {
            message: message.into(),
        }
    }

    /// Create a new schema error
    pub fn schema<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Schema {
            message: message.into(),
        }
    }

    /// Create a new identity conflict error
    pub fn identity_conflict<S: Into<String>>(unit: u32, existing: S, incoming: S) -> Self {
        VoltbridgeError::IdentityConflict {
            unit,
            existing: existing.into(),
            incoming: incoming.into(),
        }
    }

    /// Create a new command-rejected error
    pub fn command_rejected<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::CommandRejected {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        VoltbridgeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Io {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Auth {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        VoltbridgeError::Timeout {
            message: message.into(),
        }
    }

    /// Whether this error should trigger a transport-level retry rather
    /// than being surfaced to the operator.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VoltbridgeError::Transport { .. }
                | VoltbridgeError::Timeout { .. }
                | VoltbridgeError::Schema { .. }
        )
    }
}

impl From<std::io::Error> for VoltbridgeError {
    fn from(err: std::io::Error) -> Self {
        VoltbridgeError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for VoltbridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        VoltbridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VoltbridgeError {
    fn from(err: serde_json::Error) -> Self {
        VoltbridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for VoltbridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VoltbridgeError::timeout(err.to_string())
        } else {
            VoltbridgeError::transport(err.to_string())
        }
    }
}
