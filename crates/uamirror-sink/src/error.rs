// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sink error types.

use thiserror::Error;

/// Result alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Sink-related errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Database driver error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The write retry budget was exhausted.
    #[error("Write for {device}/{measure} dropped after {attempts} attempts: {message}")]
    WriteDropped {
        /// Device name.
        device: String,
        /// Measure name.
        measure: String,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        message: String,
    },

    /// A row that must exist does not.
    #[error("No row for {device}/{measure}")]
    RowMissing {
        /// Device name.
        device: String,
        /// Measure name.
        measure: String,
    },
}

impl SinkError {
    /// Creates a write-dropped error.
    pub fn write_dropped(
        device: impl Into<String>,
        measure: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::WriteDropped {
            device: device.into(),
            measure: measure.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Creates a row-missing error.
    pub fn row_missing(device: impl Into<String>, measure: impl Into<String>) -> Self {
        Self::RowMissing {
            device: device.into(),
            measure: measure.into(),
        }
    }
}
