// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process value store.
//!
//! Same observable semantics as the Postgres backend, minus durability.
//! Used by tests and dev mode.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use uamirror_core::types::{format_timestamp, MeasureUpdate, RowSeed, ONLINE_MEASURE};

use crate::error::{SinkError, SinkResult};
use crate::traits::{SinkStats, SinkStatsSnapshot, ValueRow, ValueStore, LOGGING_INSTANT};

/// In-memory value table keyed by `(device, measure)`.
#[derive(Debug, Default)]
pub struct MemoryValueStore {
    rows: Mutex<HashMap<(String, String), ValueRow>>,
    stats: SinkStats,
}

impl MemoryValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of rows currently held.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl ValueStore for MemoryValueStore {
    async fn ensure_schema(&self) -> SinkResult<()> {
        Ok(())
    }

    async fn seed_rows(&self, seeds: &[RowSeed]) -> SinkResult<()> {
        let mut rows = self.rows.lock();
        let mut inserted = 0;
        for seed in seeds {
            let key = (seed.device.clone(), seed.measure.clone());
            if rows.contains_key(&key) {
                continue;
            }
            rows.insert(
                key,
                ValueRow {
                    device: seed.device.clone(),
                    device_type: seed.device_type.clone(),
                    tag_name: seed.tag_name.clone(),
                    tag_value: 0.0,
                    measure_name: seed.measure.clone(),
                    measure_value: 0.0,
                    source_unit: seed.source_unit.clone(),
                    destination_unit: seed.destination_unit.clone(),
                    last_updated: format_timestamp(Utc::now()),
                    logging: LOGGING_INSTANT.to_string(),
                },
            );
            inserted += 1;
        }
        self.stats.record_seeded(inserted);
        Ok(())
    }

    async fn write_measure(&self, update: &MeasureUpdate) -> SinkResult<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&(update.device.clone(), update.measure.clone()))
            .ok_or_else(|| SinkError::row_missing(&update.device, &update.measure))?;
        row.tag_value = update.tag_value;
        row.measure_value = update.measure_value;
        row.last_updated = format_timestamp(Utc::now());
        self.stats.record_write();
        Ok(())
    }

    async fn set_online(&self, device: &str, online: bool) -> SinkResult<()> {
        let value = if online { 1.0 } else { 0.0 };
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&(device.to_string(), ONLINE_MEASURE.to_string()))
            .ok_or_else(|| SinkError::row_missing(device, ONLINE_MEASURE))?;
        row.tag_value = value;
        row.measure_value = value;
        row.last_updated = format_timestamp(Utc::now());
        self.stats.record_write();
        Ok(())
    }

    async fn mark_offline(&self, devices: &[String]) -> SinkResult<()> {
        let mut rows = self.rows.lock();
        for device in devices {
            if let Some(row) = rows.get_mut(&(device.clone(), ONLINE_MEASURE.to_string())) {
                row.tag_value = 0.0;
                row.measure_value = 0.0;
                row.last_updated = format_timestamp(Utc::now());
            }
        }
        Ok(())
    }

    async fn keepalive_sweep(&self) -> SinkResult<u64> {
        let stamp = format_timestamp(Utc::now());
        let mut rows = self.rows.lock();

        let online: Vec<String> = rows
            .values()
            .filter(|r| r.measure_name == ONLINE_MEASURE && r.measure_value == 1.0)
            .map(|r| r.device.clone())
            .collect();

        let mut stamped = 0;
        for row in rows.values_mut() {
            if online.contains(&row.device) {
                row.last_updated = stamp.clone();
                stamped += 1;
            }
        }
        self.stats.record_sweep();
        Ok(stamped)
    }

    async fn get_row(&self, device: &str, measure: &str) -> SinkResult<Option<ValueRow>> {
        Ok(self
            .rows
            .lock()
            .get(&(device.to_string(), measure.to_string()))
            .cloned())
    }
}
