// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-connection supervisor.
//!
//! One long-running task per configured server, independent of every
//! other connection. The task drives a four-phase machine:
//!
//! ```text
//!   Disconnected -> Connecting -> Subscribed
//!        ^                            |
//!        |      watchdog expiry /     |
//!        +--- Reconnecting <----------+
//! ```
//!
//! `Connecting` opens the session with exponential backoff and attaches
//! a fresh subscription with fresh monitored items (subscription state
//! is never reused across sessions). `Subscribed` consumes notifications
//! until the watchdog detects three minutes of silence, at which point
//! every device of this connection is marked offline and the supervisor
//! probes raw TCP reachability before attempting the protocol again.
//! Shutdown and reload cancel the task cooperatively in any phase.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use uamirror_core::types::MeasureUpdate;
use uamirror_opcua::{
    DataChangeNotification, NodeId, OpcUaTransport, SessionFactory, SubscriptionSettings,
};
use uamirror_sink::ValueStore;

use crate::builder::{SubscriptionPlan, ValueBinding};
use crate::probe;
use crate::watchdog::{Watchdog, SWEEP_INTERVAL, WATCHDOG_PERIOD};

/// Depth of the per-connection notification queue.
const NOTIFICATION_QUEUE: usize = 256;

/// Pause between connect cycles when TCP probing is disabled.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

// =============================================================================
// Settings
// =============================================================================

/// Tunables shared by every supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Silence period after which the connection is presumed dead.
    pub watchdog_period: Duration,
    /// Watchdog sweep cadence.
    pub sweep_interval: Duration,
    /// Sampling interval for every monitored item.
    pub sampling_interval: Duration,
    /// Subscription parameters.
    pub subscription: SubscriptionSettings,
    /// Whether to poll raw TCP reachability between connect cycles.
    pub probe_enabled: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            watchdog_period: WATCHDOG_PERIOD,
            sweep_interval: SWEEP_INTERVAL,
            sampling_interval: Duration::from_secs(5),
            subscription: SubscriptionSettings::default(),
            probe_enabled: true,
        }
    }
}

// =============================================================================
// Phase
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Subscribed => "Subscribed",
            Self::Reconnecting => "Reconnecting",
        };
        f.write_str(s)
    }
}

// =============================================================================
// ConnectionSupervisor
// =============================================================================

/// Owns one server connection for the duration of a run.
pub struct ConnectionSupervisor {
    plan: SubscriptionPlan,
    bindings: HashMap<NodeId, ValueBinding>,
    devices: Vec<String>,
    transport: Arc<dyn OpcUaTransport>,
    store: Arc<dyn ValueStore>,
    factory: SessionFactory,
    settings: SupervisorSettings,
}

/// Why the subscribed phase ended.
enum Drop {
    WatchdogExpired,
    ChannelClosed,
    Cancelled,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for one plan.
    pub fn new(
        plan: SubscriptionPlan,
        transport: Arc<dyn OpcUaTransport>,
        store: Arc<dyn ValueStore>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            bindings: plan.bindings(),
            devices: plan.device_names(),
            plan,
            transport,
            store,
            factory: SessionFactory::new(),
            settings,
        }
    }

    fn name(&self) -> &str {
        &self.plan.connection.connection_name
    }

    fn transition(&self, phase: &mut Phase, next: Phase) {
        if *phase != next {
            info!(connection = %self.name(), from = %phase, to = %next, "phase change");
            *phase = next;
        }
    }

    /// Runs the state machine until shutdown or reload.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
        mut reload: broadcast::Receiver<()>,
    ) {
        let endpoint = self.plan.connection.url.clone();
        let mut phase = Phase::Disconnected;

        loop {
            self.transition(&mut phase, Phase::Connecting);
            let connected = tokio::select! {
                result = self.factory.connect(self.transport.as_ref(), &endpoint) => result,
                _ = shutdown.recv() => break,
                _ = reload.recv() => break,
            };

            match connected {
                Ok(()) => {}
                Err(err) if err.is_retryable() => {
                    self.transition(&mut phase, Phase::Reconnecting);
                    let cancelled = tokio::select! {
                        _ = self.wait_for_endpoint(&endpoint) => false,
                        _ = shutdown.recv() => true,
                        _ = reload.recv() => true,
                    };
                    if cancelled {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    // Rejected credentials or a bad endpoint; retrying
                    // cannot help until the configuration changes.
                    error!(
                        connection = %self.name(),
                        error = %err,
                        "connection unusable, supervisor parked"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = reload.recv() => {}
                    }
                    break;
                }
            }

            let (tx, mut rx) = mpsc::channel(NOTIFICATION_QUEUE);
            let items = self
                .plan
                .monitored_item_requests(self.settings.sampling_interval);
            let subscribed = async {
                let sub = self
                    .transport
                    .create_subscription(&self.settings.subscription, tx)
                    .await?;
                self.transport.add_monitored_items(sub, &items).await
            }
            .await;

            if let Err(err) = subscribed {
                warn!(connection = %self.name(), error = %err, "subscription setup failed");
                let _ = self.transport.disconnect().await;
                self.transition(&mut phase, Phase::Disconnected);
                continue;
            }

            self.transition(&mut phase, Phase::Subscribed);
            info!(
                connection = %self.name(),
                devices = self.devices.len(),
                items = items.len(),
                "subscription active"
            );

            let (watchdog, feeder) = Watchdog::new(
                self.name(),
                self.settings.watchdog_period,
                self.settings.sweep_interval,
            );
            let mut accept_first = self.plan.connection.auto_accept_first_update;

            let dropped = loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(notification) => {
                            feeder.feed();
                            self.handle_notification(notification, &mut accept_first).await;
                        }
                        None => break Drop::ChannelClosed,
                    },
                    _ = watchdog.expired() => break Drop::WatchdogExpired,
                    _ = shutdown.recv() => break Drop::Cancelled,
                    _ = reload.recv() => break Drop::Cancelled,
                }
            };

            let _ = self.transport.disconnect().await;
            match dropped {
                Drop::Cancelled => break,
                Drop::WatchdogExpired => {
                    warn!(connection = %self.name(), "no notifications within watchdog period");
                    self.mark_all_offline().await;
                }
                Drop::ChannelClosed => {
                    warn!(connection = %self.name(), "notification channel closed");
                    self.mark_all_offline().await;
                }
            }
            self.transition(&mut phase, Phase::Disconnected);
        }

        let _ = self.transport.disconnect().await;
        info!(connection = %self.name(), "supervisor stopped");
    }

    /// Waits for the endpoint to become worth another protocol attempt.
    async fn wait_for_endpoint(&self, endpoint: &str) {
        if self.settings.probe_enabled {
            if !probe::wait_until_reachable(endpoint, &self.plan.connection.tcp_probe).await {
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        } else {
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }

    async fn mark_all_offline(&self) {
        if let Err(err) = self.store.mark_offline(&self.devices).await {
            warn!(connection = %self.name(), error = %err, "offline marking failed");
        }
    }

    /// Applies one notification to the value store.
    ///
    /// Good status: scale, write the measure row, then raise the online
    /// flag. The flag write deliberately follows the measure write, since
    /// the flag is the liveness signal consumers trust. Bad status: lower
    /// the online flag and leave the stored measure untouched.
    async fn handle_notification(
        &self,
        notification: DataChangeNotification,
        accept_first: &mut bool,
    ) {
        let Some(binding) = self.bindings.get(&notification.node_id) else {
            debug!(
                connection = %self.name(),
                node = %notification.node_id,
                "notification for unbound node"
            );
            return;
        };

        if !notification.is_good() {
            debug!(
                connection = %self.name(),
                device = %binding.device,
                measure = %binding.measure,
                status = %notification.status,
                "bad-status notification"
            );
            if let Err(err) = self.store.set_online(&binding.device, false).await {
                warn!(device = %binding.device, error = %err, "online flag write failed");
            }
            return;
        }

        let Some(raw) = notification.value.as_f64() else {
            debug!(
                connection = %self.name(),
                node = %notification.node_id,
                "non-numeric value ignored"
            );
            return;
        };

        if !*accept_first && self.is_stale(&notification) {
            debug!(
                connection = %self.name(),
                device = %binding.device,
                measure = %binding.measure,
                "stale value dropped"
            );
            return;
        }

        let update = MeasureUpdate {
            device: binding.device.clone(),
            measure: binding.measure.clone(),
            tag_value: raw,
            measure_value: binding.scaling.apply(raw),
        };
        match self.store.write_measure(&update).await {
            Ok(()) => {
                *accept_first = false;
                if let Err(err) = self.store.set_online(&binding.device, true).await {
                    warn!(device = %binding.device, error = %err, "online flag write failed");
                }
            }
            Err(err) => {
                warn!(
                    device = %update.device,
                    measure = %update.measure,
                    error = %err,
                    "measure write failed"
                );
            }
        }
    }

    /// Whether the notification's source timestamp falls outside the
    /// connection's staleness window. Values without a source timestamp
    /// are never considered stale.
    fn is_stale(&self, notification: &DataChangeNotification) -> bool {
        let Some(source) = notification.source_timestamp else {
            return false;
        };
        match chrono::Duration::from_std(self.plan.connection.timeout()) {
            Ok(window) => Utc::now().signed_duration_since(source) > window,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uamirror_config::ConfigSnapshot;
    use uamirror_config::schema::{PointTemplates, SiteDevices};
    use uamirror_config::{ClientConnection, PlantConfig};
    use uamirror_core::types::ONLINE_MEASURE;
    use uamirror_opcua::{InMemoryTransport, OpcUaValue, SessionConfig, StatusCode};
    use uamirror_sink::MemoryValueStore;

    use crate::builder::build_plans;

    fn snapshot(auto_accept: bool) -> ConfigSnapshot {
        let connections: Vec<ClientConnection> = serde_json::from_str(&format!(
            r#"[{{
                "connectionName": "plant-a",
                "url": "opc.tcp://10.0.4.20:4840",
                "autoAcceptFirstUpdate": {auto_accept}
            }}]"#
        ))
        .unwrap();
        let devices: SiteDevices = serde_json::from_str(
            r#"{"inverter": [{
                "daq_name": "inv1",
                "daq_template": "basic",
                "device_type": "inverter",
                "network": {"params": {
                    "protocol": "opcua", "prefix": "INV1_",
                    "server": "plant-a", "point_node": "ns=2;s=Devices"
                }}
            }]}"#,
        )
        .unwrap();
        let templates: PointTemplates = serde_json::from_str(
            r#"{"inverter": {"basic": [{
                "unit": "W", "name": "W", "measure": "power",
                "autoScaling": {"scale_mode": "slope_intercept", "slope": 0.1, "offset": 0}
            }]}}"#,
        )
        .unwrap();
        ConfigSnapshot {
            connections,
            devices,
            templates,
            plant: PlantConfig::default(),
        }
    }

    struct Rig {
        transport: Arc<InMemoryTransport>,
        store: Arc<MemoryValueStore>,
        shutdown: broadcast::Sender<()>,
        _reload: broadcast::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn start(auto_accept: bool, settings: SupervisorSettings) -> Rig {
        let plan = build_plans(&snapshot(auto_accept)).remove(0);
        let transport = Arc::new(InMemoryTransport::new(SessionConfig::new(
            "opc.tcp://10.0.4.20:4840",
        )));
        let store = Arc::new(MemoryValueStore::new());
        store.seed_rows(&plan.seeds()).await.unwrap();

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let (reload, reload_rx) = broadcast::channel::<()>(1);

        let supervisor = ConnectionSupervisor::new(
            plan,
            transport.clone() as Arc<dyn OpcUaTransport>,
            store.clone() as Arc<dyn ValueStore>,
            settings,
        );
        let handle = tokio::spawn(supervisor.run(shutdown_rx, reload_rx));

        // Let the supervisor reach the subscribed phase.
        while transport.subscription_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Rig {
            transport,
            store,
            shutdown,
            _reload: reload,
            handle,
        }
    }

    fn dev_settings() -> SupervisorSettings {
        SupervisorSettings {
            probe_enabled: false,
            ..SupervisorSettings::default()
        }
    }

    async fn publish(rig: &Rig, value: OpcUaValue, status: StatusCode) {
        rig.transport
            .publish(DataChangeNotification {
                node_id: "ns=2;s=Devices/INV1_W".into(),
                value,
                status,
                source_timestamp: Some(Utc::now()),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn stop(rig: Rig) {
        rig.shutdown.send(()).unwrap();
        rig.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn good_value_is_scaled_and_raises_online() {
        let rig = start(true, dev_settings()).await;

        publish(&rig, OpcUaValue::Double(1060.0), StatusCode::GOOD).await;

        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.tag_value, 1060.0);
        assert_eq!(row.measure_value, 106.0);

        let online = rig
            .store
            .get_row("inv1", ONLINE_MEASURE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(online.measure_value, 1.0);

        stop(rig).await;
    }

    #[tokio::test(start_paused = true)]
    async fn bad_status_lowers_online_and_keeps_measure() {
        let rig = start(true, dev_settings()).await;

        publish(&rig, OpcUaValue::Double(1060.0), StatusCode::GOOD).await;
        publish(&rig, OpcUaValue::Double(9999.0), StatusCode::BAD).await;

        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.measure_value, 106.0);

        let online = rig
            .store
            .get_row("inv1", ONLINE_MEASURE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(online.measure_value, 0.0);

        stop(rig).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_update_bypasses_staleness_once() {
        let rig = start(true, dev_settings()).await;
        let old = Utc::now() - chrono::Duration::hours(1);

        // First update is hours old but accepted unconditionally.
        rig.transport
            .publish(DataChangeNotification {
                node_id: "ns=2;s=Devices/INV1_W".into(),
                value: OpcUaValue::Double(100.0),
                status: StatusCode::GOOD,
                source_timestamp: Some(old),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.measure_value, 10.0);

        // The escape hatch is spent; a second stale update is dropped.
        rig.transport
            .publish(DataChangeNotification {
                node_id: "ns=2;s=Devices/INV1_W".into(),
                value: OpcUaValue::Double(500.0),
                status: StatusCode::GOOD,
                source_timestamp: Some(old),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.measure_value, 10.0);

        // Fresh values still flow.
        publish(&rig, OpcUaValue::Double(200.0), StatusCode::GOOD).await;
        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.measure_value, 20.0);

        stop(rig).await;
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_silence_marks_devices_offline_and_resubscribes() {
        let mut settings = dev_settings();
        settings.watchdog_period = Duration::from_secs(30);
        settings.sweep_interval = Duration::from_secs(10);
        let rig = start(true, settings).await;

        publish(&rig, OpcUaValue::Double(1060.0), StatusCode::GOOD).await;
        let online = rig
            .store
            .get_row("inv1", ONLINE_MEASURE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(online.measure_value, 1.0);

        // Full silence; the watchdog fires and the device goes offline.
        tokio::time::sleep(Duration::from_secs(45)).await;
        let online = rig
            .store
            .get_row("inv1", ONLINE_MEASURE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(online.measure_value, 0.0);

        // The supervisor reconnects with a fresh subscription.
        while rig.transport.subscription_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rig.transport.monitored_items().len(), 1);

        stop(rig).await;
    }
}
