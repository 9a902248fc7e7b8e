// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A connection with this name already exists.
    #[error("Connection '{name}' already exists")]
    DuplicateConnection {
        /// The duplicated connection name.
        name: String,
    },

    /// No connection with this name exists.
    #[error("Connection '{name}' not found")]
    ConnectionNotFound {
        /// The missing connection name.
        name: String,
    },

    /// Required environment variable is not set.
    #[error("Environment variable '{name}' is not set")]
    EnvVarNotFound {
        /// The variable name.
        name: String,
    },

    /// Invalid encryption key.
    #[error("Invalid encryption key: {message}")]
    InvalidEncryptionKey {
        /// Error message.
        message: String,
    },

    /// Encryption failed.
    #[error("Failed to encrypt value: {message}")]
    EncryptionFailed {
        /// Error message.
        message: String,
    },

    /// Decryption failed.
    #[error("Failed to decrypt value: {message}")]
    DecryptionFailed {
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates an I/O error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error for a path.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate-connection error.
    pub fn duplicate_connection(name: impl Into<String>) -> Self {
        Self::DuplicateConnection { name: name.into() }
    }

    /// Creates a connection-not-found error.
    pub fn connection_not_found(name: impl Into<String>) -> Self {
        Self::ConnectionNotFound { name: name.into() }
    }

    /// Creates an environment-variable-not-found error.
    pub fn env_var_not_found(name: impl Into<String>) -> Self {
        Self::EnvVarNotFound { name: name.into() }
    }

    /// Creates an invalid-encryption-key error.
    pub fn invalid_encryption_key(message: impl Into<String>) -> Self {
        Self::InvalidEncryptionKey {
            message: message.into(),
        }
    }

    /// Creates an encryption-failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption-failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Whether a retry of the same read could plausibly succeed.
    ///
    /// Covers the concurrent-writer window: a file read mid-write shows
    /// up as either an I/O error or truncated JSON.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let io = ConfigError::io("/tmp/x.json", std::io::Error::other("boom"));
        assert!(io.is_retryable());
        let parse = ConfigError::parse("/tmp/x.json", "unexpected EOF");
        assert!(parse.is_retryable());
        let validation = ConfigError::validation("url", "empty");
        assert!(!validation.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = ConfigError::connection_not_found("plant-a");
        assert_eq!(err.to_string(), "Connection 'plant-a' not found");
    }
}
