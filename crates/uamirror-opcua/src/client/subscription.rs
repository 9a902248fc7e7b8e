// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription settings, monitored items, and data-change notifications.
//!
//! Subscriptions are not reusable across sessions: after any reconnect
//! the engine creates a fresh subscription and re-registers every
//! monitored item, which also re-binds notification delivery.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uamirror_core::retry::duration_millis;

use crate::types::NodeId;

use super::transport::{OpcUaValue, StatusCode};

// =============================================================================
// Identifiers
// =============================================================================

/// Client-side subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Client-side monitored item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoredItemId(pub u32);

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mi-{}", self.0)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Parameters for one server subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval requested from the server.
    #[serde(default = "default_publishing_interval", with = "duration_millis")]
    pub publishing_interval: Duration,

    /// Lifetime count; 0 lets the server choose.
    #[serde(default)]
    pub lifetime_count: u32,

    /// Minimum subscription lifetime honored during revision.
    #[serde(default = "default_min_lifetime", with = "duration_millis")]
    pub min_lifetime: Duration,
}

fn default_publishing_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_min_lifetime() -> Duration {
    Duration::from_secs(120)
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: 0,
            min_lifetime: default_min_lifetime(),
        }
    }
}

// =============================================================================
// MonitoredItemRequest
// =============================================================================

/// One monitored item to register on a subscription.
///
/// The change filter triggers on status, value, or timestamp change; the
/// queue is bounded and discards oldest so a consumer stall loses history
/// rather than recency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredItemRequest {
    /// Node to monitor.
    pub node_id: NodeId,

    /// Sampling interval requested from the server.
    #[serde(default = "default_sampling_interval", with = "duration_millis")]
    pub sampling_interval: Duration,

    /// Server-side queue depth.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Drop the oldest queued value on overflow.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_sampling_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_size() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl MonitoredItemRequest {
    /// Creates a request with default sampling and queue policy.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
        }
    }
}

// =============================================================================
// DataChangeNotification
// =============================================================================

/// One value change pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    /// Node that changed.
    pub node_id: NodeId,

    /// The new value.
    pub value: OpcUaValue,

    /// Status of the value.
    pub status: StatusCode,

    /// Source timestamp reported by the server, when available.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl DataChangeNotification {
    /// Whether the value is usable.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_display_with_prefix() {
        assert_eq!(SubscriptionId(3).to_string(), "sub-3");
        assert_eq!(MonitoredItemId(17).to_string(), "mi-17");
    }

    #[test]
    fn defaults_match_subscription_profile() {
        let settings = SubscriptionSettings::default();
        assert_eq!(settings.publishing_interval, Duration::from_secs(1));
        assert_eq!(settings.lifetime_count, 0);
        assert_eq!(settings.min_lifetime, Duration::from_secs(120));

        let item = MonitoredItemRequest::new("ns=2;s=Devices/INV1_W");
        assert_eq!(item.sampling_interval, Duration::from_secs(5));
        assert_eq!(item.queue_size, 10);
        assert!(item.discard_oldest);
    }

    #[test]
    fn notification_goodness_follows_status() {
        let good = DataChangeNotification {
            node_id: "ns=2;s=X".into(),
            value: OpcUaValue::Double(1.5),
            status: StatusCode::GOOD,
            source_timestamp: Some(Utc::now()),
        };
        assert!(good.is_good());

        let bad = DataChangeNotification {
            status: StatusCode::BAD,
            ..good
        };
        assert!(!bad.is_good());
    }
}
