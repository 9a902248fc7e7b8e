// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA error types.
//!
//! Split along recovery boundaries: connection errors feed the
//! reconnection state machine, subscription errors force a resubscribe,
//! browse errors bubble to the browse job's caller, and operation errors
//! cover everything request-scoped.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias for OPC UA operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

/// Top-level OPC UA error.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Connection-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Subscription-level failure.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Browse-level failure.
    #[error(transparent)]
    Browse(#[from] BrowseError),

    /// Request-scoped operation failure.
    #[error("Operation '{operation}' failed: {message}")]
    Operation {
        /// The failing operation.
        operation: String,
        /// Error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        /// The failing operation.
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },
}

impl OpcUaError {
    /// Creates an operation error.
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Subscription(_) => false,
            Self::Browse(e) => e.is_retryable(),
            Self::Operation { .. } => false,
            Self::Timeout { .. } => true,
        }
    }
}

/// Connection-level errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint does not parse or resolve.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The offending endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The server refused or dropped the connection.
    #[error("Connection to '{endpoint}' failed: {message}")]
    Failed {
        /// The endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The server rejected the supplied identity.
    #[error("Authentication rejected for '{endpoint}': {message}")]
    AuthenticationRejected {
        /// The endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// An operation was attempted without an active session.
    #[error("Not connected to '{endpoint}'")]
    NotConnected {
        /// The endpoint URL.
        endpoint: String,
    },
}

impl ConnectionError {
    /// Creates an invalid-endpoint error.
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a connection-failed error.
    pub fn failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an authentication-rejected error.
    pub fn authentication_rejected(
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthenticationRejected {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a not-connected error.
    pub fn not_connected(endpoint: impl Into<String>) -> Self {
        Self::NotConnected {
            endpoint: endpoint.into(),
        }
    }

    /// Invalid endpoints and rejected credentials do not heal on retry.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::NotConnected { .. })
    }
}

/// Subscription-level errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The server rejected subscription creation.
    #[error("Failed to create subscription: {message}")]
    CreateFailed {
        /// Error message.
        message: String,
    },

    /// The server rejected one or more monitored items.
    #[error("Failed to create {failed} of {requested} monitored items")]
    MonitoredItemsRejected {
        /// Items requested.
        requested: usize,
        /// Items rejected.
        failed: usize,
    },

    /// A subscription id is unknown to the transport.
    #[error("Unknown subscription: {id}")]
    UnknownSubscription {
        /// The unknown id.
        id: u32,
    },
}

impl SubscriptionError {
    /// Creates a create-failed error.
    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::CreateFailed {
            message: message.into(),
        }
    }
}

/// Browse-level errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// A browse job for this connection is already running.
    #[error("A browse job for connection '{connection}' is already running")]
    JobAlreadyRunning {
        /// The connection name.
        connection: String,
    },

    /// The job was cancelled before completion.
    #[error("Browse job cancelled")]
    Cancelled,

    /// A browse call failed after its retry.
    #[error("Browse of node '{node}' failed: {message}")]
    NodeFailed {
        /// The node being browsed.
        node: String,
        /// Error message.
        message: String,
    },

    /// Output or sentinel file I/O failed.
    #[error("Browse output I/O failed for '{path}': {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BrowseError {
    /// Creates a node-failed error.
    pub fn node_failed(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Duplicate jobs and cancellations must not be retried blindly.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodeFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_recovery_boundaries() {
        let refused: OpcUaError = ConnectionError::failed("opc.tcp://x", "refused").into();
        assert!(refused.is_retryable());

        let bad_auth: OpcUaError =
            ConnectionError::authentication_rejected("opc.tcp://x", "denied").into();
        assert!(!bad_auth.is_retryable());

        let dup: OpcUaError = BrowseError::JobAlreadyRunning {
            connection: "plant-a".into(),
        }
        .into();
        assert!(!dup.is_retryable());

        assert!(OpcUaError::timeout("browse", Duration::from_secs(30)).is_retryable());
    }
}
