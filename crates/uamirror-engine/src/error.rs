// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine error hierarchy.

use thiserror::Error;

use uamirror_config::ConfigError;
use uamirror_opcua::OpcUaError;
use uamirror_sink::SinkError;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the subscription engine and browse job manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Protocol-level failure.
    #[error(transparent)]
    Protocol(#[from] OpcUaError),

    /// Value store failure.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A browse job was requested for a connection that does not exist.
    #[error("unknown connection '{name}'")]
    UnknownConnection {
        /// The requested connection name.
        name: String,
    },
}

impl EngineError {
    /// Creates an unknown-connection error.
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection { name: name.into() }
    }
}
