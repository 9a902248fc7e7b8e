// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The supervising engine.
//!
//! One instance per process. Each run loads a fresh configuration
//! snapshot, pre-seeds the value table, and spawns one supervisor task
//! per monitored connection. A run ends on shutdown or on a reload
//! trigger (a watched file changed, or a collaborator asked for a
//! rebuild after mutating the connection list); reload cancels every
//! supervisor cooperatively via a run-scoped token that is never reused,
//! then starts the next run from scratch. Partial reconciliation of
//! configuration diffs is deliberately not attempted.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use uamirror_config::encryption::Encryptor;
use uamirror_config::{ClientConnection, ConfigLoader, ConfigWatcher};
use uamirror_opcua::{
    BrowseRef, Identity, InMemoryTransport, NodeId, OpcUaTransport, SessionConfig,
};
use uamirror_sink::ValueStore;

use crate::builder::build_plans;
use crate::connection::{ConnectionSupervisor, SupervisorSettings};
use crate::error::EngineResult;

// =============================================================================
// TransportFactory
// =============================================================================

/// Creates one transport per connection per run.
///
/// The seam between the engine and the protocol backend: production
/// wires the real client here, tests and dev mode an in-memory one.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport for the given session configuration.
    fn create(&self, config: SessionConfig) -> Arc<dyn OpcUaTransport>;
}

/// Factory handing out [`InMemoryTransport`]s, keyed by endpoint.
///
/// Keeps a handle to the most recently created transport per endpoint so
/// dev tooling and tests can publish values into it, and installs any
/// scripted namespace on every transport it creates.
#[derive(Default)]
pub struct InMemoryTransportFactory {
    created: DashMap<String, Arc<InMemoryTransport>>,
    namespaces: DashMap<String, Vec<(NodeId, Vec<BrowseRef>)>>,
}

impl InMemoryTransportFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent transport created for an endpoint.
    pub fn transport_for(&self, endpoint: &str) -> Option<Arc<InMemoryTransport>> {
        self.created.get(endpoint).map(|t| t.clone())
    }

    /// Scripts a namespace subtree for every future transport of an
    /// endpoint.
    pub fn seed_namespace(
        &self,
        endpoint: impl Into<String>,
        parent: impl Into<NodeId>,
        children: Vec<BrowseRef>,
    ) {
        self.namespaces
            .entry(endpoint.into())
            .or_default()
            .push((parent.into(), children));
    }
}

impl TransportFactory for InMemoryTransportFactory {
    fn create(&self, config: SessionConfig) -> Arc<dyn OpcUaTransport> {
        let endpoint = config.endpoint.clone();
        let transport = Arc::new(InMemoryTransport::new(config));
        if let Some(namespace) = self.namespaces.get(&endpoint) {
            for (parent, children) in namespace.iter() {
                transport.set_children(parent.clone(), children.clone());
            }
        }
        self.created.insert(endpoint, transport.clone());
        transport
    }
}

// =============================================================================
// Session configuration
// =============================================================================

/// Builds the session configuration for a connection, resolving the
/// stored password when an encryptor is available.
pub fn session_config_for(
    connection: &ClientConnection,
    encryptor: Option<&Encryptor>,
) -> SessionConfig {
    let mut config =
        SessionConfig::new(&connection.url).with_operation_timeout(connection.timeout());
    if let Some(username) = &connection.username {
        let password = match (&connection.encrypted_password, encryptor) {
            (Some(secret), Some(encryptor)) => match encryptor.decrypt(secret) {
                Ok(password) => password,
                Err(err) => {
                    warn!(
                        connection = %connection.connection_name,
                        error = %err,
                        "password decryption failed, using empty password"
                    );
                    String::new()
                }
            },
            (Some(_), None) => {
                warn!(
                    connection = %connection.connection_name,
                    "password stored but no encryption key available"
                );
                String::new()
            }
            (None, _) => String::new(),
        };
        config = config.with_identity(Identity::UsernamePassword {
            username: username.clone(),
            password,
        });
    }
    config
}

// =============================================================================
// ReloadHandle
// =============================================================================

/// Collaborator-facing trigger for a full rebuild.
///
/// Invoked after any connection-list mutation. Requests coalesce: asking
/// while a reload is already pending is a no-op.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Requests a rebuild of every subscription.
    pub fn reload_subscriptions(&self) {
        let _ = self.tx.try_send(());
    }
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// Owns every per-connection supervisor and the reload cycle.
pub struct SubscriptionEngine {
    loader: ConfigLoader,
    store: Arc<dyn ValueStore>,
    transports: Arc<dyn TransportFactory>,
    settings: SupervisorSettings,
    encryptor: Option<Encryptor>,
    shutdown: broadcast::Sender<()>,
    reload_tx: mpsc::Sender<()>,
    reload_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl SubscriptionEngine {
    /// Creates an engine. `shutdown` is the process-wide stop signal.
    pub fn new(
        loader: ConfigLoader,
        store: Arc<dyn ValueStore>,
        transports: Arc<dyn TransportFactory>,
        settings: SupervisorSettings,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let (reload_tx, reload_rx) = mpsc::channel(1);
        Self {
            loader,
            store,
            transports,
            settings,
            encryptor: None,
            shutdown,
            reload_tx,
            reload_rx: Mutex::new(Some(reload_rx)),
        }
    }

    /// Attaches the password decryptor for authenticated connections.
    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Handle for collaborator-triggered rebuilds.
    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            tx: self.reload_tx.clone(),
        }
    }

    /// Runs build-and-subscribe cycles until shutdown.
    pub async fn run(&self) -> EngineResult<()> {
        let Some(mut reload_requests) = self.reload_rx.lock().take() else {
            warn!("engine run requested twice, ignoring");
            return Ok(());
        };
        let mut shutdown = self.shutdown.subscribe();
        let mut first_run = true;

        // One watcher for the whole run, primed before the first load.
        // A write landing between a load and the cycle's select would be
        // absorbed into a per-cycle baseline and silently lost; with a
        // long-lived watcher it surfaces as an extra rebuild instead.
        let mut watcher = ConfigWatcher::new(self.loader.dir());

        loop {
            let snapshot = match self.loader.load_snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) if first_run => return Err(err.into()),
                Err(err) => {
                    // A half-written reload must not take the running
                    // process down; wait for the next change instead.
                    error!(error = %err, "configuration reload failed, waiting for next change");
                    tokio::select! {
                        _ = watcher.changed() => continue,
                        _ = reload_requests.recv() => continue,
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            };
            first_run = false;

            let plans = build_plans(&snapshot);
            for plan in &plans {
                self.store.seed_rows(&plan.seeds()).await?;
            }

            // Run-scoped cancellation token, reissued fresh every cycle.
            let (reload_token, _) = broadcast::channel(1);
            let mut supervisors = Vec::with_capacity(plans.len());
            for plan in plans {
                let config = session_config_for(&plan.connection, self.encryptor.as_ref());
                let transport = self.transports.create(config);
                let supervisor = ConnectionSupervisor::new(
                    plan,
                    transport,
                    self.store.clone(),
                    self.settings.clone(),
                );
                supervisors.push(tokio::spawn(
                    supervisor.run(self.shutdown.subscribe(), reload_token.subscribe()),
                ));
            }

            let stopping = tokio::select! {
                _ = shutdown.recv() => true,
                _ = watcher.changed() => {
                    info!("configuration change detected");
                    false
                }
                _ = reload_requests.recv() => {
                    info!("reload requested");
                    false
                }
            };

            let _ = reload_token.send(());
            for supervisor in supervisors {
                let _ = supervisor.await;
            }

            if stopping {
                info!("subscription engine stopped");
                return Ok(());
            }
            info!("rebuilding all subscriptions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use uamirror_sink::MemoryValueStore;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn devices_doc(device: &str) -> String {
        format!(
            r#"{{"inverter": [{{
                "daq_name": "{device}",
                "daq_template": "basic",
                "device_type": "inverter",
                "network": {{"params": {{
                    "protocol": "opcua", "prefix": "{device}_",
                    "server": "plant-a", "point_node": "ns=2;s=Devices"
                }}}}
            }}]}}"#
        )
    }

    fn seed_config_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "opcua_client_config.json",
            r#"[{"connectionName": "plant-a", "url": "opc.tcp://10.0.4.20:4840"}]"#,
        );
        write_file(dir.path(), "site_devices.json", &devices_doc("inv1"));
        write_file(
            dir.path(),
            "sos_templates_opcua.json",
            r#"{"inverter": {"basic": [{
                "unit": "W", "name": "W", "measure": "power",
                "autoScaling": {"scale_mode": "slope_intercept", "slope": 0.1}
            }]}}"#,
        );
        write_file(dir.path(), "plant_config.json", "{}");
        dir
    }

    struct Rig {
        dir: TempDir,
        factory: Arc<InMemoryTransportFactory>,
        store: Arc<MemoryValueStore>,
        engine: Arc<SubscriptionEngine>,
        shutdown: broadcast::Sender<()>,
        handle: tokio::task::JoinHandle<EngineResult<()>>,
    }

    async fn start_engine() -> Rig {
        let dir = seed_config_dir();
        let factory = Arc::new(InMemoryTransportFactory::new());
        let store = Arc::new(MemoryValueStore::new());
        let (shutdown, _) = broadcast::channel(1);

        let settings = SupervisorSettings {
            probe_enabled: false,
            ..SupervisorSettings::default()
        };
        let engine = Arc::new(SubscriptionEngine::new(
            ConfigLoader::new(dir.path()),
            store.clone() as Arc<dyn ValueStore>,
            factory.clone() as Arc<dyn TransportFactory>,
            settings,
            shutdown.clone(),
        ));
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        wait_for_subscription(&factory).await;
        Rig {
            dir,
            factory,
            store,
            engine,
            shutdown,
            handle,
        }
    }

    async fn wait_for_subscription(
        factory: &InMemoryTransportFactory,
    ) -> Arc<InMemoryTransport> {
        loop {
            if let Some(transport) = factory.transport_for("opc.tcp://10.0.4.20:4840") {
                if transport.subscription_count() > 0 {
                    return transport;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn startup_seeds_rows_and_subscribes() {
        let rig = start_engine().await;

        // One measure row and one online row, zeroed, before any value.
        assert_eq!(rig.store.row_count(), 2);
        let row = rig.store.get_row("inv1", "power").await.unwrap().unwrap();
        assert_eq!(row.measure_value, 0.0);

        let transport = wait_for_subscription(&rig.factory).await;
        let items = transport.monitored_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node_id.as_str(), "ns=2;s=Devices/INV1_W");

        rig.shutdown.send(()).unwrap();
        rig.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn file_change_rebuilds_subscriptions_exactly_once() {
        let rig = start_engine().await;
        let old_transport = wait_for_subscription(&rig.factory).await;

        // Changing the inventory must tear the run down and rebuild.
        write_file(rig.dir.path(), "site_devices.json", &devices_doc("inv9"));

        let new_transport = loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(t) = rig.factory.transport_for("opc.tcp://10.0.4.20:4840") {
                if !Arc::ptr_eq(&t, &old_transport) && t.subscription_count() > 0 {
                    break t;
                }
            }
        };

        // The old run's subscription died with its session.
        assert_eq!(old_transport.subscription_count(), 0);

        // Exactly one registration of the new device's point.
        let items = new_transport.monitored_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node_id.as_str(), "ns=2;s=Devices/inv9_W");

        rig.shutdown.send(()).unwrap();
        rig.handle.await.unwrap().unwrap();
    }

    /// Store wrapper that parks the first `seed_rows` call until the
    /// test releases it, exposing the window between snapshot load and
    /// the cycle's select.
    struct GatedStore {
        inner: MemoryValueStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        gate_armed: std::sync::atomic::AtomicBool,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryValueStore::new(),
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
                gate_armed: std::sync::atomic::AtomicBool::new(true),
            }
        }
    }

    #[async_trait::async_trait]
    impl ValueStore for GatedStore {
        async fn ensure_schema(&self) -> uamirror_sink::SinkResult<()> {
            self.inner.ensure_schema().await
        }

        async fn seed_rows(
            &self,
            seeds: &[uamirror_core::types::RowSeed],
        ) -> uamirror_sink::SinkResult<()> {
            if self
                .gate_armed
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.seed_rows(seeds).await
        }

        async fn write_measure(
            &self,
            update: &uamirror_core::types::MeasureUpdate,
        ) -> uamirror_sink::SinkResult<()> {
            self.inner.write_measure(update).await
        }

        async fn set_online(&self, device: &str, online: bool) -> uamirror_sink::SinkResult<()> {
            self.inner.set_online(device, online).await
        }

        async fn mark_offline(&self, devices: &[String]) -> uamirror_sink::SinkResult<()> {
            self.inner.mark_offline(devices).await
        }

        async fn keepalive_sweep(&self) -> uamirror_sink::SinkResult<u64> {
            self.inner.keepalive_sweep().await
        }

        async fn get_row(
            &self,
            device: &str,
            measure: &str,
        ) -> uamirror_sink::SinkResult<Option<uamirror_sink::ValueRow>> {
            self.inner.get_row(device, measure).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn change_landing_during_build_still_triggers_rebuild() {
        let dir = seed_config_dir();
        let factory = Arc::new(InMemoryTransportFactory::new());
        let store = Arc::new(GatedStore::new());
        let (shutdown, _) = broadcast::channel(1);

        let settings = SupervisorSettings {
            probe_enabled: false,
            ..SupervisorSettings::default()
        };
        let engine = Arc::new(SubscriptionEngine::new(
            ConfigLoader::new(dir.path()),
            store.clone() as Arc<dyn ValueStore>,
            factory.clone() as Arc<dyn TransportFactory>,
            settings,
            shutdown.clone(),
        ));
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // The snapshot is loaded and seeding has begun; rewrite the
        // inventory inside that window, then let the cycle proceed.
        store.entered.notified().await;
        write_file(dir.path(), "site_devices.json", &devices_doc("inv9"));
        store.release.notify_one();

        // The in-window write must still surface as a rebuild.
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(t) = rig_transport(&factory) {
                let items = t.monitored_items();
                if t.subscription_count() > 0
                    && items.len() == 1
                    && items[0].node_id.as_str() == "ns=2;s=Devices/inv9_W"
                {
                    break;
                }
            }
        }

        shutdown.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    fn rig_transport(factory: &InMemoryTransportFactory) -> Option<Arc<InMemoryTransport>> {
        factory.transport_for("opc.tcp://10.0.4.20:4840")
    }

    #[tokio::test(start_paused = true)]
    async fn reload_handle_forces_a_rebuild() {
        let rig = start_engine().await;
        let old_transport = wait_for_subscription(&rig.factory).await;

        rig.engine.reload_handle().reload_subscriptions();

        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(t) = rig.factory.transport_for("opc.tcp://10.0.4.20:4840") {
                if !Arc::ptr_eq(&t, &old_transport) && t.subscription_count() > 0 {
                    break;
                }
            }
        }

        rig.shutdown.send(()).unwrap();
        rig.handle.await.unwrap().unwrap();
    }
}
