// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! One [`ShutdownCoordinator`] is created at startup and its broadcast
//! channel is threaded through the engine, the keep-alive task, and the
//! supervisors. The first SIGTERM/SIGINT (or an internal fault) trips
//! the coordinator; every subscriber then drains and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Broadcast-based shutdown fan-out with idempotent triggering.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// The underlying broadcast sender, for components that subscribe
    /// lazily (the engine hands a receiver to each supervisor it spawns).
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.sender.clone()
    }

    /// Trip the shutdown. Safe to call more than once; only the first
    /// call broadcasts.
    pub fn initiate_shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("shutdown initiated");
            // Err means no live receivers, which is fine during teardown
            let _ = self.sender.send(());
        }
    }

    /// True once shutdown has been triggered.
    #[inline]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Wait for an OS termination signal, then trip the shutdown.
    #[cfg(unix)]
    pub async fn wait_for_signal(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(error) => {
                tracing::error!(%error, "failed to register SIGTERM handler");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(error) => {
                tracing::error!(%error, "failed to register SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = term.recv() => info!(signal = "SIGTERM", "termination signal received"),
            _ = int.recv() => info!(signal = "SIGINT", "termination signal received"),
        }
        self.initiate_shutdown();
    }

    /// Wait for Ctrl-C, then trip the shutdown.
    #[cfg(not(unix))]
    pub async fn wait_for_signal(&self) {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to register Ctrl-C handler");
            return;
        }
        info!("termination signal received");
        self.initiate_shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
