// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The storage seam between the subscription engine and its backends.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use uamirror_core::types::{MeasureUpdate, RowSeed};

use crate::error::SinkResult;

// =============================================================================
// ValueRow
// =============================================================================

/// One persisted row of the value table.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    /// Device name.
    pub device: String,
    /// Device type.
    pub device_type: String,
    /// Raw protocol tag name.
    pub tag_name: String,
    /// Latest raw value.
    pub tag_value: f64,
    /// Measure name.
    pub measure_name: String,
    /// Latest scaled value.
    pub measure_value: f64,
    /// Unit of the raw value.
    pub source_unit: String,
    /// Unit of the scaled value.
    pub destination_unit: String,
    /// ISO-8601 stamp of the last write.
    pub last_updated: String,
    /// Logging mode tag carried for downstream consumers.
    pub logging: String,
}

/// Logging mode written into seeded rows.
pub const LOGGING_INSTANT: &str = "instant";

// =============================================================================
// ValueStore
// =============================================================================

/// Operations the subscription engine performs against the value table.
///
/// Implementations must make each call safe against concurrent calls for
/// other rows and against the keep-alive sweep; the engine already
/// serializes writes for any single row.
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Creates the table idempotently.
    async fn ensure_schema(&self) -> SinkResult<()>;

    /// Inserts missing rows at 0.0/0.0; existing rows are untouched.
    async fn seed_rows(&self, seeds: &[RowSeed]) -> SinkResult<()>;

    /// Writes one accepted value update into its row.
    async fn write_measure(&self, update: &MeasureUpdate) -> SinkResult<()>;

    /// Sets a device's online measure to 1.0 or 0.0.
    async fn set_online(&self, device: &str, online: bool) -> SinkResult<()>;

    /// Marks every listed device offline.
    async fn mark_offline(&self, devices: &[String]) -> SinkResult<()>;

    /// Re-stamps `last_updated` on every row of every online device.
    ///
    /// Returns the number of re-stamped rows. Compensates for the
    /// protocol only pushing changed values; without it an
    /// unchanging-but-healthy tag looks stale to consumers.
    async fn keepalive_sweep(&self) -> SinkResult<u64>;

    /// Reads one row, mainly for tests and diagnostics.
    async fn get_row(&self, device: &str, measure: &str) -> SinkResult<Option<ValueRow>>;
}

// =============================================================================
// SinkStats
// =============================================================================

/// Counters for sink activity.
#[derive(Debug, Default)]
pub struct SinkStats {
    writes: AtomicU64,
    dropped_writes: AtomicU64,
    rows_seeded: AtomicU64,
    sweeps: AtomicU64,
}

/// A point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    /// Successful row writes.
    pub writes: u64,
    /// Writes dropped after retry exhaustion.
    pub dropped_writes: u64,
    /// Rows inserted by seeding.
    pub rows_seeded: u64,
    /// Keep-alive sweeps run.
    pub sweeps: u64,
}

impl SinkStats {
    /// Records a successful write.
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped write.
    pub fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records seeded rows.
    pub fn record_seeded(&self, count: u64) {
        self.rows_seeded.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a keep-alive sweep.
    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters.
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            rows_seeded: self.rows_seeded.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate() {
        let stats = SinkStats::default();
        stats.record_write();
        stats.record_write();
        stats.record_dropped_write();
        stats.record_seeded(12);
        stats.record_sweep();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.writes, 2);
        assert_eq!(snapshot.dropped_writes, 1);
        assert_eq!(snapshot.rows_seeded, 12);
        assert_eq!(snapshot.sweeps, 1);
    }
}
