// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded retry with fixed or exponential delay.
//!
//! Used wherever the gateway tolerates transient failure: config files
//! read mid-write, session creation against a flapping server, and
//! database writes under contention. Exhaustion surfaces as the last
//! error, never a panic.
//!
//! # Example
//!
//! ```rust,ignore
//! use uamirror_core::retry::{retry, RetryConfig, RetryDelay};
//!
//! let config = RetryConfig::new(3).with_delay(RetryDelay::Exponential);
//! let value = retry(&config, "load-config", || async {
//!     read_config().await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// RetryDelay
// =============================================================================

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryDelay {
    /// Same delay before every attempt.
    Fixed,

    /// Delay multiplied by `multiplier` after each attempt.
    #[default]
    Exponential,
}

// =============================================================================
// RetryConfig
// =============================================================================

/// Configuration for a bounded retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (0 behaves as 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap on the computed delay.
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor for exponential delay.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor in `[0.0, 1.0]`; the delay is scaled by a random
    /// value in `[1 - jitter, 1 + jitter]`.
    #[serde(default)]
    pub jitter: f64,

    /// Delay growth mode.
    #[serde(default)]
    pub delay: RetryDelay,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
            delay: RetryDelay::Exponential,
        }
    }
}

impl RetryConfig {
    /// Creates a configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Sets the delay growth mode.
    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Computes the delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.delay {
            RetryDelay::Fixed => self.initial_delay,
            RetryDelay::Exponential => {
                let factor = self.multiplier.powi(attempt as i32);
                let millis = self.initial_delay.as_millis() as f64 * factor;
                Duration::from_millis(millis.min(u64::MAX as f64) as u64)
            }
        };
        apply_jitter(base.min(self.max_delay), self.jitter)
    }
}

// =============================================================================
// Retry loop
// =============================================================================

/// Runs `op` until it succeeds, a non-retryable error occurs, or the
/// attempt budget is exhausted. Returns the last error on exhaustion.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(config, operation, &mut op, |_| true).await
}

/// Like [`retry`], but only retries errors for which `should_retry`
/// returns true.
pub async fn retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: &str,
    op: &mut F,
    should_retry: P,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut last_attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if last_attempt > 0 {
                    debug!(operation, attempt = last_attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if last_attempt + 1 < attempts && should_retry(&err) => {
                let delay = config.delay_for(last_attempt);
                warn!(
                    operation,
                    attempt = last_attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                last_attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Scales `delay` by a random factor in `[1 - jitter, 1 + jitter]`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + jitter * (2.0 * simple_random() - 1.0);
    Duration::from_millis((delay.as_millis() as f64 * factor).max(0.0) as u64)
}

/// Cheap xorshift PRNG over the monotonic clock; good enough for delay
/// jitter, not for anything security-relevant.
fn simple_random() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0x9E37_79B9);

    let mut x = nanos.wrapping_mul(0x2545_F491_4F6C_DD1D) | 1;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x % 10_000) as f64 / 10_000.0
}

/// Serde helper storing `Duration` as integer milliseconds.
pub mod duration_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    /// Serializes a duration as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserializes a duration from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4));
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let config = RetryConfig::new(3)
            .with_delay(RetryDelay::Fixed)
            .with_initial_delay(Duration::from_millis(250));
        assert_eq!(config.delay_for(0), Duration::from_millis(250));
        assert_eq!(config.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = apply_jitter(base, 0.2);
            assert!(jittered >= Duration::from_millis(800));
            assert!(jittered <= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(1));

        let result: Result<u32, String> = retry(&config, "test-op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_on_exhaustion() {
        let config = RetryConfig::new(2).with_initial_delay(Duration::from_millis(1));
        let result: Result<(), String> =
            retry(&config, "test-op", || async { Err("still down".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "still down");
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(1));

        let mut op = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("fatal".to_string()) }
        };
        let result = retry_if(&config, "test-op", &mut op, |e| e != &"fatal").await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
