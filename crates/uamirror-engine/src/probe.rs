// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP reachability probing.
//!
//! Protocol-level session establishment is expensive against a host that
//! is not even accepting TCP connections, so after a connection drop the
//! supervisor first polls with raw connects. The delay between probes
//! widens per [`TcpProbeConfig`] (5 s steps up to a 30 s cap by default)
//! and the loop runs until the host accepts or the run is cancelled.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use uamirror_config::schema::TcpProbeConfig;

/// Deadline for a single raw connect attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extracts the `host:port` authority from an `opc.tcp://` endpoint URL.
pub fn endpoint_authority(endpoint: &str) -> Option<&str> {
    let rest = endpoint.strip_prefix("opc.tcp://")?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        None
    } else {
        Some(authority)
    }
}

/// Checks once whether the endpoint accepts a TCP connection.
pub async fn is_reachable(authority: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(authority)).await,
        Ok(Ok(_))
    )
}

/// Polls the endpoint until it accepts a raw TCP connection.
///
/// Returns `false` if the endpoint URL has no usable authority, in which
/// case probing can never succeed and the caller should fall back to
/// protocol-level retry alone.
pub async fn wait_until_reachable(endpoint: &str, probe: &TcpProbeConfig) -> bool {
    let Some(authority) = endpoint_authority(endpoint) else {
        debug!(endpoint, "endpoint has no probe-able authority");
        return false;
    };

    let mut attempt: u32 = 0;
    loop {
        if is_reachable(authority).await {
            info!(endpoint, attempts = attempt + 1, "endpoint reachable");
            return true;
        }
        let delay = probe.delay_for(attempt);
        debug!(
            endpoint,
            attempt,
            next_probe_secs = delay.as_secs(),
            "endpoint unreachable"
        );
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn authority_extraction() {
        assert_eq!(
            endpoint_authority("opc.tcp://10.0.4.20:4840"),
            Some("10.0.4.20:4840")
        );
        assert_eq!(
            endpoint_authority("opc.tcp://plc.plant:4840/UA/Server"),
            Some("plc.plant:4840")
        );
        assert_eq!(endpoint_authority("http://10.0.4.20"), None);
        assert_eq!(endpoint_authority("opc.tcp://"), None);
    }

    #[tokio::test]
    async fn listening_socket_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(is_reachable(&addr.to_string()).await);

        let endpoint = format!("opc.tcp://{addr}");
        let probe = TcpProbeConfig::default();
        assert!(wait_until_reachable(&endpoint, &probe).await);
    }
}
