// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Postgres-backed value store.
//!
//! Every write runs in a short transaction that locks the target row
//! with `SELECT ... FOR UPDATE` before updating it, so concurrent
//! writers for different connections never interleave on the same
//! `(device, measure_name)` row. Transactions stay open only for the
//! lock-update-commit sequence; no application work happens inside.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use uamirror_core::types::{format_timestamp, MeasureUpdate, RowSeed, ONLINE_MEASURE};

use crate::error::{SinkError, SinkResult};
use crate::traits::{SinkStats, SinkStatsSnapshot, ValueRow, ValueStore, LOGGING_INSTANT};

// ============================================================================
// Schema
// ============================================================================

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS modvalues (
    device           TEXT NOT NULL,
    device_type      TEXT NOT NULL,
    tag_name         TEXT NOT NULL,
    tag_value        DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    measure_name     TEXT NOT NULL,
    measure_value    DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    source_unit      TEXT NOT NULL DEFAULT '',
    destination_unit TEXT NOT NULL DEFAULT '',
    last_updated     TEXT NOT NULL,
    logging          TEXT NOT NULL DEFAULT 'instant',
    UNIQUE (device, measure_name)
)
"#;

/// Number of attempts for a single row write before it is dropped.
const WRITE_ATTEMPTS: u32 = 3;

/// Pause between write attempts.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// PgValueStore
// ============================================================================

/// Value store writing to the `modvalues` table.
pub struct PgValueStore {
    pool: PgPool,
    stats: SinkStats,
}

impl PgValueStore {
    /// Connects a pool against `url` and wraps it.
    pub async fn connect(url: &str, max_connections: u32) -> SinkResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            stats: SinkStats::default(),
        })
    }

    /// Wraps an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            stats: SinkStats::default(),
        }
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Locks the `(device, measure)` row and applies the new pair of
    /// values inside a single transaction.
    async fn write_row_once(
        &self,
        device: &str,
        measure: &str,
        tag_value: f64,
        measure_value: f64,
    ) -> SinkResult<()> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            "SELECT device FROM modvalues \
             WHERE device = $1 AND measure_name = $2 FOR UPDATE",
        )
        .bind(device)
        .bind(measure)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            tx.rollback().await?;
            return Err(SinkError::row_missing(device, measure));
        }

        sqlx::query(
            "UPDATE modvalues \
             SET tag_value = $3, measure_value = $4, last_updated = $5 \
             WHERE device = $1 AND measure_name = $2",
        )
        .bind(device)
        .bind(measure)
        .bind(tag_value)
        .bind(measure_value)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Retries a row write a fixed number of times before giving up.
    /// A dropped write is logged and surfaced; the caller moves on to
    /// the next notification.
    async fn write_row(
        &self,
        device: &str,
        measure: &str,
        tag_value: f64,
        measure_value: f64,
    ) -> SinkResult<()> {
        let mut last_error = String::new();
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.write_row_once(device, measure, tag_value, measure_value).await {
                Ok(()) => {
                    self.stats.record_write();
                    return Ok(());
                }
                Err(error @ SinkError::RowMissing { .. }) => return Err(error),
                Err(error) => {
                    warn!(
                        device,
                        measure,
                        attempt,
                        error = %error,
                        "row write failed"
                    );
                    last_error = error.to_string();
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(WRITE_RETRY_DELAY).await;
                    }
                }
            }
        }
        self.stats.record_dropped_write();
        Err(SinkError::write_dropped(
            device,
            measure,
            WRITE_ATTEMPTS,
            last_error,
        ))
    }
}

#[async_trait]
impl ValueStore for PgValueStore {
    async fn ensure_schema(&self) -> SinkResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn seed_rows(&self, seeds: &[RowSeed]) -> SinkResult<()> {
        let stamp = format_timestamp(Utc::now());
        let mut inserted = 0u64;
        for seed in seeds {
            let result = sqlx::query(
                "INSERT INTO modvalues \
                 (device, device_type, tag_name, tag_value, measure_name, \
                  measure_value, source_unit, destination_unit, last_updated, logging) \
                 VALUES ($1, $2, $3, 0.0, $4, 0.0, $5, $6, $7, $8) \
                 ON CONFLICT (device, measure_name) DO NOTHING",
            )
            .bind(&seed.device)
            .bind(&seed.device_type)
            .bind(&seed.tag_name)
            .bind(&seed.measure)
            .bind(&seed.source_unit)
            .bind(&seed.destination_unit)
            .bind(&stamp)
            .bind(LOGGING_INSTANT)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        debug!(requested = seeds.len(), inserted, "seeded value rows");
        self.stats.record_seeded(inserted);
        Ok(())
    }

    async fn write_measure(&self, update: &MeasureUpdate) -> SinkResult<()> {
        self.write_row(
            &update.device,
            &update.measure,
            update.tag_value,
            update.measure_value,
        )
        .await
    }

    async fn set_online(&self, device: &str, online: bool) -> SinkResult<()> {
        let value = if online { 1.0 } else { 0.0 };
        self.write_row(device, ONLINE_MEASURE, value, value).await
    }

    async fn mark_offline(&self, devices: &[String]) -> SinkResult<()> {
        if devices.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE modvalues \
             SET tag_value = 0.0, measure_value = 0.0, last_updated = $2 \
             WHERE measure_name = $3 AND device = ANY($1)",
        )
        .bind(devices)
        .bind(format_timestamp(Utc::now()))
        .bind(ONLINE_MEASURE)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn keepalive_sweep(&self) -> SinkResult<u64> {
        let result = sqlx::query(
            "UPDATE modvalues SET last_updated = $1 \
             WHERE device IN ( \
                 SELECT device FROM modvalues \
                 WHERE measure_name = $2 AND measure_value = 1.0)",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(ONLINE_MEASURE)
        .execute(&self.pool)
        .await?;
        self.stats.record_sweep();
        Ok(result.rows_affected())
    }

    async fn get_row(&self, device: &str, measure: &str) -> SinkResult<Option<ValueRow>> {
        let row = sqlx::query(
            "SELECT device, device_type, tag_name, tag_value, measure_name, \
                    measure_value, source_unit, destination_unit, last_updated, logging \
             FROM modvalues WHERE device = $1 AND measure_name = $2",
        )
        .bind(device)
        .bind(measure)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ValueRow {
            device: r.get("device"),
            device_type: r.get("device_type"),
            tag_name: r.get("tag_name"),
            tag_value: r.get("tag_value"),
            measure_name: r.get("measure_name"),
            measure_value: r.get("measure_value"),
            source_unit: r.get("source_unit"),
            destination_unit: r.get("destination_unit"),
            last_updated: r.get("last_updated"),
            logging: r.get("logging"),
        }))
    }
}
