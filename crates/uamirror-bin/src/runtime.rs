// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime assembly.
//!
//! Wires the configuration loader, value store, transport backend, and
//! subscription engine together, then runs until a termination signal
//! or an unrecoverable engine fault.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use uamirror_config::encryption::Encryptor;
use uamirror_config::{ConfigError, ConfigLoader};
use uamirror_engine::{
    BrowseJobManager, InMemoryTransportFactory, SubscriptionEngine, SupervisorSettings,
    TransportFactory,
};
use uamirror_sink::keepalive::KEEPALIVE_INTERVAL;
use uamirror_sink::{spawn_keepalive, MemoryValueStore, PgValueStore, ValueStore};

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Connection pool size for the value store.
const DB_POOL_SIZE: u32 = 5;

// =============================================================================
// RealTransportFactory
// =============================================================================

/// Factory producing one real OPC UA client transport per session.
#[cfg(feature = "real-transport")]
#[derive(Debug, Default)]
pub struct RealTransportFactory;

#[cfg(feature = "real-transport")]
impl TransportFactory for RealTransportFactory {
    fn create(
        &self,
        config: uamirror_opcua::SessionConfig,
    ) -> Arc<dyn uamirror_opcua::OpcUaTransport> {
        Arc::new(uamirror_opcua::RealOpcUaTransport::new(config))
    }
}

// =============================================================================
// GatewayRuntime
// =============================================================================

/// A fully wired gateway, ready to run.
pub struct GatewayRuntime {
    loader: ConfigLoader,
    store: Arc<dyn ValueStore>,
    transports: Arc<dyn TransportFactory>,
    settings: SupervisorSettings,
    encryptor: Option<Encryptor>,
    shutdown: ShutdownCoordinator,
    dev_mode: bool,
}

impl GatewayRuntime {
    /// Browse-job manager sharing this runtime's transport backend.
    pub fn browse_jobs(&self, config_dir: PathBuf) -> BrowseJobManager {
        let manager = BrowseJobManager::new(config_dir, self.transports.clone());
        match &self.encryptor {
            Some(encryptor) => manager.with_encryptor(encryptor.clone()),
            None => manager,
        }
    }

    /// Run the gateway until shutdown.
    pub async fn run(self) -> BinResult<()> {
        info!(
            dev_mode = self.dev_mode,
            version = env!("CARGO_PKG_VERSION"),
            "gateway starting"
        );

        let keepalive = spawn_keepalive(
            self.store.clone(),
            KEEPALIVE_INTERVAL,
            self.shutdown.subscribe(),
        );

        let mut engine = SubscriptionEngine::new(
            self.loader,
            self.store,
            self.transports,
            self.settings,
            self.shutdown.sender(),
        );
        if let Some(encryptor) = self.encryptor {
            engine = engine.with_encryptor(encryptor);
        }
        let engine = Arc::new(engine);

        let mut engine_task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });

        let joined = tokio::select! {
            _ = self.shutdown.wait_for_signal() => {
                // signal path: the broadcast is already out, let the
                // engine drain its supervisors before we leave
                (&mut engine_task).await
            }
            joined = &mut engine_task => joined,
        };
        self.shutdown.initiate_shutdown();
        let _ = keepalive.await;

        match joined {
            Ok(Ok(())) => {
                info!("gateway stopped");
                Ok(())
            }
            Ok(Err(error)) => {
                error!(%error, "engine fault");
                Err(error.into())
            }
            Err(join_error) => {
                error!(%join_error, "engine task aborted");
                Err(BinError::runtime("engine task aborted"))
            }
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder assembling a [`GatewayRuntime`] from CLI inputs.
pub struct RuntimeBuilder {
    config_path: PathBuf,
    dev_mode: bool,
}

impl RuntimeBuilder {
    /// Start a builder with the default configuration directory.
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from(uamirror_config::DEFAULT_CONFIG_DIR),
            dev_mode: false,
        }
    }

    /// Set the configuration directory.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Run against in-memory backends instead of a live server and
    /// database.
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Connect the backends and assemble the runtime.
    pub async fn build(self) -> BinResult<GatewayRuntime> {
        let loader = ConfigLoader::new(&self.config_path);
        let encryptor = load_encryptor()?;

        let mut settings = SupervisorSettings::default();

        let (store, transports): (Arc<dyn ValueStore>, Arc<dyn TransportFactory>) =
            if self.dev_mode {
                settings.probe_enabled = false;
                info!("dev mode: in-memory value store and transport");
                (
                    Arc::new(MemoryValueStore::new()),
                    Arc::new(InMemoryTransportFactory::new()),
                )
            } else {
                let snapshot = loader.load_snapshot().await?;
                let url = snapshot.plant.db.connect_url();
                let store = PgValueStore::connect(&url, DB_POOL_SIZE).await?;
                store.ensure_schema().await?;
                info!(
                    server = %snapshot.plant.db.server,
                    database = %snapshot.plant.db.database,
                    "value store connected"
                );
                (Arc::new(store), real_transport_factory()?)
            };

        Ok(GatewayRuntime {
            loader,
            store,
            transports,
            settings,
            encryptor,
            shutdown: ShutdownCoordinator::new(),
            dev_mode: self.dev_mode,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The production transport factory, when compiled in.
#[cfg(feature = "real-transport")]
pub fn real_transport_factory() -> BinResult<Arc<dyn TransportFactory>> {
    Ok(Arc::new(RealTransportFactory))
}

/// The production transport factory, when compiled in.
#[cfg(not(feature = "real-transport"))]
pub fn real_transport_factory() -> BinResult<Arc<dyn TransportFactory>> {
    Err(BinError::init(
        "built without the real-transport feature; use `run --dev` or rebuild with --features real-transport",
    ))
}

/// Load the password encryption key from the environment.
///
/// A missing key only matters for connections that carry credentials,
/// so it downgrades to a warning; a malformed key is fatal.
pub fn load_encryptor() -> BinResult<Option<Encryptor>> {
    match Encryptor::from_env() {
        Ok(encryptor) => Ok(Some(encryptor)),
        Err(ConfigError::EnvVarNotFound { name }) => {
            warn!(
                variable = %name,
                "password encryption key not set; authenticated connections will fail"
            );
            Ok(None)
        }
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dev_mode_builds_without_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = RuntimeBuilder::new()
            .config_path(dir.path())
            .dev_mode(true)
            .build()
            .await
            .unwrap();
        assert!(runtime.dev_mode);
    }
}
