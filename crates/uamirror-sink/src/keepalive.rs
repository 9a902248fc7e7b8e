// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Background keep-alive sweep.
//!
//! Downstream consumers treat a stale `last_updated` as a dead signal
//! even when the value simply has not changed. The sweep re-stamps
//! every row of every online device on a fixed cadence so unchanged
//! values stay visibly fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::ValueStore;

/// Default sweep cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns the sweep loop. The task runs until `shutdown` fires.
pub fn spawn_keepalive(
    store: Arc<dyn ValueStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the
        // first sweep lands one full interval after startup.
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "keep-alive sweep started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.keepalive_sweep().await {
                        Ok(stamped) => debug!(stamped, "keep-alive sweep"),
                        Err(error) => warn!(error = %error, "keep-alive sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("keep-alive sweep stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryValueStore;
    use uamirror_core::types::RowSeed;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_cadence_and_stops_on_shutdown() {
        let store = Arc::new(MemoryValueStore::new());
        store
            .seed_rows(&[RowSeed::online("inv1", "inverter")])
            .await
            .unwrap();
        store.set_online("inv1", true).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_keepalive(store.clone(), Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(store.stats().sweeps, 2);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
