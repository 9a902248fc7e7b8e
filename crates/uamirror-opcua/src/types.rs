// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-level types: node identifiers, node classes, and session
//! configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// NodeId
// =============================================================================

/// An OPC UA node identifier in its string form, e.g. `ns=2;s=Devices/INV1_W`.
///
/// Kept opaque: the gateway computes node ids by concatenation and passes
/// them through to the server; it never needs to decompose them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from its string form.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The standard Objects folder (`i=85`), root of every browse.
    pub fn objects_folder() -> Self {
        Self("i=85".to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// NodeClass
// =============================================================================

/// Class of a browsed node, as tagged in the browse output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeClass {
    /// A folder-like object node.
    #[default]
    Object,
    /// A value-carrying variable node.
    Variable,
    /// A callable method node.
    Method,
    /// Anything else the server reports.
    Unspecified,
}

impl NodeClass {
    /// Display string used in the browse output document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::Unspecified => "Unspecified",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Identity
// =============================================================================

/// User identity presented during session activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Identity {
    /// Anonymous session.
    #[default]
    Anonymous,

    /// Username/password session.
    UsernamePassword {
        /// Username.
        username: String,
        /// Plaintext password, decrypted just before activation.
        password: String,
    },
}

impl Identity {
    /// Whether this identity carries credentials.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::UsernamePassword { .. })
    }
}

// =============================================================================
// SessionConfig
// =============================================================================

/// Configuration for one protocol session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server endpoint URL.
    pub endpoint: String,

    /// User identity.
    #[serde(default)]
    pub identity: Identity,

    /// Application name announced to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Per-request operation timeout.
    #[serde(default = "default_operation_timeout", with = "duration_millis")]
    pub operation_timeout: Duration,

    /// Session timeout negotiated with the server.
    #[serde(default = "default_session_timeout", with = "duration_millis")]
    pub session_timeout: Duration,

    /// Endpoint discovery timeout.
    #[serde(default = "default_discovery_timeout", with = "duration_millis")]
    pub discovery_timeout: Duration,
}

fn default_application_name() -> String {
    "uamirror".to_string()
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_discovery_timeout() -> Duration {
    Duration::from_secs(5)
}

use uamirror_core::retry::duration_millis;

impl SessionConfig {
    /// Creates a session configuration for an endpoint with defaults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: Identity::Anonymous,
            application_name: default_application_name(),
            operation_timeout: default_operation_timeout(),
            session_timeout: default_session_timeout(),
            discovery_timeout: default_discovery_timeout(),
        }
    }

    /// Sets the identity.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_opaque_and_displayable() {
        let id = NodeId::new("ns=2;s=Devices/INV1_W");
        assert_eq!(id.as_str(), "ns=2;s=Devices/INV1_W");
        assert_eq!(id.to_string(), "ns=2;s=Devices/INV1_W");
        assert_eq!(NodeId::objects_folder().as_str(), "i=85");
    }

    #[test]
    fn identity_predicates() {
        assert!(!Identity::Anonymous.is_authenticated());
        let auth = Identity::UsernamePassword {
            username: "operator".into(),
            password: "pw".into(),
        };
        assert!(auth.is_authenticated());
    }

    #[test]
    fn session_defaults_match_field_profile() {
        let config = SessionConfig::new("opc.tcp://localhost:4840");
        assert_eq!(config.operation_timeout, Duration::from_secs(15));
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
    }
}
