// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session factory: connect with backoff.
//!
//! The factory owns no sessions; it drives a transport's `connect` until
//! it succeeds or the attempt budget runs out, with exponential backoff
//! starting at one second and doubling. Rejected credentials and invalid
//! endpoints fail fast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use uamirror_core::retry::{retry_if, RetryConfig, RetryDelay};

use crate::error::{OpcUaError, OpcUaResult};

use super::transport::OpcUaTransport;

/// Counters for session factory activity.
#[derive(Debug, Default)]
pub struct SessionStats {
    connects: AtomicU64,
    failures: AtomicU64,
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    /// Successful session establishments.
    pub connects: u64,
    /// Exhausted connect attempts.
    pub failures: u64,
}

impl SessionStats {
    fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters.
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Opens sessions with bounded exponential backoff.
#[derive(Debug)]
pub struct SessionFactory {
    retry: RetryConfig,
    stats: SessionStats,
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory {
    /// Creates a factory with the default backoff profile
    /// (5 attempts, 1 s initial delay, doubling, 60 s cap).
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::new(5)
                .with_delay(RetryDelay::Exponential)
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60)),
            stats: SessionStats::default(),
        }
    }

    /// Overrides the backoff profile.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Factory activity counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Connects the transport, retrying transient failures.
    pub async fn connect(
        &self,
        transport: &dyn OpcUaTransport,
        endpoint: &str,
    ) -> OpcUaResult<()> {
        let mut op = || async { transport.connect().await };
        let result = retry_if(&self.retry, "session-connect", &mut op, OpcUaError::is_retryable).await;

        match &result {
            Ok(()) => {
                self.stats.record_connect();
                info!(endpoint, "session established");
            }
            Err(err) => {
                self.stats.record_failure();
                warn!(endpoint, error = %err, "session establishment failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::InMemoryTransport;
    use crate::error::ConnectionError;
    use crate::types::SessionConfig;

    fn fast_factory(attempts: u32) -> SessionFactory {
        SessionFactory::new().with_retry(
            RetryConfig::new(attempts)
                .with_delay(RetryDelay::Fixed)
                .with_initial_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn connects_after_transient_failures() {
        let transport = InMemoryTransport::new(SessionConfig::new("opc.tcp://sim"));
        transport.fail_next_connects(2);

        let factory = fast_factory(5);
        factory.connect(&transport, "opc.tcp://sim").await.unwrap();

        assert!(transport.state().await.is_connected());
        let stats = factory.stats().snapshot();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn exhaustion_records_failure() {
        let transport = InMemoryTransport::new(SessionConfig::new("opc.tcp://sim"));
        transport.fail_next_connects(10);

        let factory = fast_factory(2);
        let err = factory.connect(&transport, "opc.tcp://sim").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(factory.stats().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn rejected_credentials_fail_fast() {
        let transport = InMemoryTransport::new(SessionConfig::new("opc.tcp://sim"));
        transport.reject_authentication();

        let factory = fast_factory(5);
        let err = factory.connect(&transport, "opc.tcp://sim").await.unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Connection(ConnectionError::AuthenticationRejected { .. })
        ));
        // One attempt only; auth rejection is not retryable.
        assert_eq!(transport.connect_attempts(), 1);
    }
}
