// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The transport seam.
//!
//! Everything above this trait (session factory, subscription engine,
//! browse engine) is backend-agnostic. The default build ships only the
//! in-memory transport; the `real-transport` feature adds the `opcua`
//! crate backend.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::OpcUaResult;
use crate::types::{NodeClass, NodeId};

use super::subscription::{
    DataChangeNotification, MonitoredItemId, MonitoredItemRequest, SubscriptionId,
    SubscriptionSettings,
};

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// No connection.
    #[default]
    Disconnected,
    /// Connection in progress.
    Connecting,
    /// Session active.
    Connected,
    /// Connection failed and has not been retried yet.
    Failed,
}

impl TransportState {
    /// Whether requests can be issued in this state.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC UA status code.
///
/// Only the severity bits matter to the gateway: the top bit flags Bad,
/// the next Uncertain; anything else is Good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The generic Good status.
    pub const GOOD: Self = Self(0);

    /// The generic Bad status.
    pub const BAD: Self = Self(0x8000_0000);

    /// The generic Uncertain status.
    pub const UNCERTAIN: Self = Self(0x4000_0000);

    /// Severity mask for Bad.
    const BAD_MASK: u32 = 0x8000_0000;

    /// Severity mask for Uncertain.
    const UNCERTAIN_MASK: u32 = 0x4000_0000;

    /// Whether the status is Good severity.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & (Self::BAD_MASK | Self::UNCERTAIN_MASK) == 0
    }

    /// Whether the status is Bad severity.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & Self::BAD_MASK != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// =============================================================================
// OpcUaValue
// =============================================================================

/// A protocol value in one of the variant types the gateway handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcUaValue {
    /// Boolean.
    Boolean(bool),
    /// Signed integer (any width, widened).
    Integer(i64),
    /// Unsigned integer (any width, widened).
    UInteger(u64),
    /// Floating point (any width, widened).
    Double(f64),
    /// String.
    Text(String),
    /// Null or an unmapped variant type.
    Null,
}

impl OpcUaValue {
    /// Converts to `f64` where a numeric reading exists.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Integer(i) => Some(*i as f64),
            Self::UInteger(u) => Some(*u as f64),
            Self::Double(d) => Some(*d),
            Self::Text(s) => s.parse().ok(),
            Self::Null => None,
        }
    }

    /// Whether the value carries nothing usable.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// =============================================================================
// BrowseRef
// =============================================================================

/// One hierarchical reference returned by a browse call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseRef {
    /// Target node id.
    pub node_id: NodeId,
    /// Display name shown in the catalog.
    pub display_name: String,
    /// Node class of the target.
    pub node_class: NodeClass,
}

// =============================================================================
// OpcUaTransport
// =============================================================================

/// Backend-agnostic OPC UA client transport.
///
/// Implementations own the session lifecycle. Notification delivery is
/// push-based: `create_subscription` takes the sending half of a channel
/// and the transport publishes every data change into it from whatever
/// thread the protocol library uses.
#[async_trait]
pub trait OpcUaTransport: Send + Sync {
    /// Opens a session to the configured endpoint.
    async fn connect(&self) -> OpcUaResult<()>;

    /// Closes the session and drops all subscriptions.
    async fn disconnect(&self) -> OpcUaResult<()>;

    /// Current connection state.
    async fn state(&self) -> TransportState;

    /// Browses the hierarchical references of a node.
    async fn browse(&self, node: &NodeId) -> OpcUaResult<Vec<BrowseRef>>;

    /// Creates a subscription whose notifications flow into `sink`.
    async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
        sink: mpsc::Sender<DataChangeNotification>,
    ) -> OpcUaResult<SubscriptionId>;

    /// Registers monitored items on a subscription.
    async fn add_monitored_items(
        &self,
        subscription: SubscriptionId,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemId>>;
}
