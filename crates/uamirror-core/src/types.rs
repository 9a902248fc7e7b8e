// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for the gateway.
//!
//! These are the structures that cross crate boundaries: the identity of
//! a persisted row and the payload of a single accepted value update.
//! Protocol-level types (node ids, monitored items) live in
//! `uamirror-opcua`; configuration documents live in `uamirror-config`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The synthetic per-device liveness measure.
///
/// Every device owns exactly one row with this measure name. Its value is
/// 1.0 while the device's connection is delivering good-status data and
/// 0.0 once the connection is presumed dead or a bad-status notification
/// arrives.
pub const ONLINE_MEASURE: &str = "myPV_online";

/// Timestamp format used for the `last_updated` column.
///
/// ISO-8601 with microsecond precision, no timezone suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Formats a timestamp the way the value table stores it.
#[inline]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// =============================================================================
// RowSeed
// =============================================================================

/// Identity of one persisted value row, used to pre-seed the table.
///
/// Exactly one row exists per `(device, measure)` pair. Rows are created
/// lazily the first time a (device, point) combination is seen and are
/// never deleted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowSeed {
    /// Device name (`daqName` in the site inventory).
    pub device: String,
    /// Device type, used to resolve the point template.
    pub device_type: String,
    /// Raw protocol tag name.
    pub tag_name: String,
    /// Logical measure name.
    pub measure: String,
    /// Unit of the raw tag value.
    pub source_unit: String,
    /// Unit of the scaled measure value.
    pub destination_unit: String,
}

impl RowSeed {
    /// Seed row for a device's synthetic online measure.
    pub fn online(device: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            device_type: device_type.into(),
            tag_name: ONLINE_MEASURE.to_string(),
            measure: ONLINE_MEASURE.to_string(),
            source_unit: String::new(),
            destination_unit: String::new(),
        }
    }
}

impl fmt::Display for RowSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.measure)
    }
}

// =============================================================================
// MeasureUpdate
// =============================================================================

/// One accepted good-status value update, ready to persist.
///
/// Carries both the raw tag value and the scaled measure value so the
/// sink never needs the scaling descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureUpdate {
    /// Device name.
    pub device: String,
    /// Logical measure name.
    pub measure: String,
    /// Raw protocol value.
    pub tag_value: f64,
    /// Scaled engineering value, already rounded to 3 decimals.
    pub measure_value: f64,
}
