// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging initialization.
//!
//! Builds a `tracing-subscriber` registry from the CLI's level and format
//! choices. `RUST_LOG` wins over the CLI level when set, so operators can
//! still use per-module directives without touching the service unit.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormat;

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any log events are emitted.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        // sqlx logs every statement at info; too chatty for a gateway
        // that writes rows on every notification
        .add_directive("sqlx=warn".parse().unwrap_or_default());

    let ansi = std::io::stdout().is_terminal();

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(ansi).with_target(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_ansi(ansi).with_target(false))
                .init();
        }
    }
}
