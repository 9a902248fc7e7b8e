// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-connection silence watchdog.
//!
//! Every notification feeds a shared "alive" flag; a periodic sweep
//! checks the flag, clears it, and restarts the silence clock when it
//! was set. This decouples notification bursts from timer resets: a
//! thousand updates a second cost a thousand atomic stores, not a
//! thousand timer rearms.
//!
//! Feeding is monotonic with respect to the sweep. A feed that races a
//! sweep either lands before the swap (clock restarts this sweep) or
//! after it (flag survives until the next sweep, clock restarts then);
//! it is never lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// Default silence period after which a connection is presumed dead.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(180);

/// Default sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Cheap handle fed from the notification path.
#[derive(Debug, Clone, Default)]
pub struct WatchdogFeeder {
    fed: Arc<AtomicBool>,
}

impl WatchdogFeeder {
    /// Marks the connection alive until the next sweep.
    #[inline]
    pub fn feed(&self) {
        self.fed.store(true, Ordering::Release);
    }
}

/// Silence detector for one connection.
#[derive(Debug)]
pub struct Watchdog {
    connection: String,
    fed: Arc<AtomicBool>,
    period: Duration,
    sweep_interval: Duration,
}

impl Watchdog {
    /// Creates an armed watchdog and its feeder handle.
    pub fn new(
        connection: impl Into<String>,
        period: Duration,
        sweep_interval: Duration,
    ) -> (Self, WatchdogFeeder) {
        let feeder = WatchdogFeeder::default();
        let watchdog = Self {
            connection: connection.into(),
            fed: feeder.fed.clone(),
            period,
            sweep_interval,
        };
        (watchdog, feeder)
    }

    /// Resolves once the connection has been silent for the full period.
    ///
    /// Cancel-safe: dropping the future and calling again continues the
    /// silence measurement from a fresh clock.
    pub async fn expired(&self) {
        let mut silent = Duration::ZERO;
        loop {
            tokio::time::sleep(self.sweep_interval).await;
            if self.fed.swap(false, Ordering::AcqRel) {
                silent = Duration::ZERO;
            } else {
                silent += self.sweep_interval;
                if silent >= self.period {
                    debug!(
                        connection = %self.connection,
                        silent_secs = silent.as_secs(),
                        "watchdog expired"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_full_silence() {
        let (watchdog, _feeder) =
            Watchdog::new("plant-a", Duration::from_secs(180), Duration::from_secs(15));

        let start = tokio::time::Instant::now();
        watchdog.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn feeding_restarts_the_silence_clock() {
        let (watchdog, feeder) =
            Watchdog::new("plant-a", Duration::from_secs(60), Duration::from_secs(15));

        let feeder_task = tokio::spawn(async move {
            // Feed twice, 50 s apart, then go silent.
            feeder.feed();
            tokio::time::sleep(Duration::from_secs(50)).await;
            feeder.feed();
        });

        let start = tokio::time::Instant::now();
        watchdog.expired().await;
        feeder_task.await.unwrap();

        // Second feed lands inside the 45-60 s sweep window, so expiry
        // needs a further full period beyond it.
        assert!(start.elapsed() >= Duration::from_secs(110));
    }
}
