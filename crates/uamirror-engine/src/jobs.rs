// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Browse job orchestration.
//!
//! Runs at most one namespace crawl per connection. The on-disk sentinel
//! file is the authoritative single-job guard (it survives process
//! restarts and is visible to the external configuration surface); the
//! in-process registry adds cancellation and completion tracking for the
//! jobs this process started.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use uamirror_config::encryption::Encryptor;
use uamirror_config::ClientConnection;
use uamirror_opcua::{
    run_browse_job, BrowseError, BrowseJobPaths, BrowseOptions, OpcUaError, SessionFactory,
};

use crate::engine::{session_config_for, TransportFactory};
use crate::error::EngineResult;

struct JobHandle {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

/// Starts and tracks browse jobs.
pub struct BrowseJobManager {
    config_dir: PathBuf,
    transports: Arc<dyn TransportFactory>,
    encryptor: Option<Encryptor>,
    jobs: DashMap<String, JobHandle>,
}

impl BrowseJobManager {
    /// Creates a manager writing output under `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            config_dir: config_dir.into(),
            transports,
            encryptor: None,
            jobs: DashMap::new(),
        }
    }

    /// Attaches the password decryptor for authenticated connections.
    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Whether a job for the connection is currently running.
    pub fn is_job_running(&self, connection_name: &str) -> bool {
        if let Some(job) = self.jobs.get(connection_name) {
            if !job.done.load(Ordering::Acquire) {
                return true;
            }
        }
        BrowseJobPaths::new(&self.config_dir, connection_name).job_running()
    }

    /// Starts a browse job in the background.
    ///
    /// Fails fast with [`BrowseError::JobAlreadyRunning`] when a job for
    /// this connection is still in flight.
    pub fn start_job(&self, connection: &ClientConnection) -> EngineResult<()> {
        let name = connection.connection_name.clone();
        if self.is_job_running(&name) {
            let err = OpcUaError::from(BrowseError::JobAlreadyRunning { connection: name });
            return Err(err.into());
        }

        let options = BrowseOptions::new()
            .with_exclusions(connection.browse_exclusion_folders.clone())
            .with_max_workers(connection.max_search);
        let transport =
            self.transports
                .create(session_config_for(connection, self.encryptor.as_ref()));

        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        self.jobs.insert(
            name.clone(),
            JobHandle {
                cancel: cancel.clone(),
                done: done.clone(),
            },
        );

        let endpoint = connection.url.clone();
        let config_dir = self.config_dir.clone();
        tokio::spawn(async move {
            let factory = SessionFactory::new();
            let result = async {
                factory.connect(transport.as_ref(), &endpoint).await?;
                run_browse_job(transport.clone(), &name, &config_dir, options, cancel).await
            }
            .await;
            let _ = transport.disconnect().await;

            match result {
                Ok(path) => info!(
                    connection = %name,
                    output = %path.display(),
                    "browse job finished"
                ),
                Err(err) => warn!(connection = %name, error = %err, "browse job failed"),
            }
            done.store(true, Ordering::Release);
        });
        Ok(())
    }

    /// Requests cooperative cancellation of every in-flight job.
    pub fn cancel_all(&self) {
        for job in self.jobs.iter() {
            job.cancel.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use uamirror_config::schema::TcpProbeConfig;
    use uamirror_opcua::{BrowseRef, NodeClass, OpcUaError};

    use crate::engine::InMemoryTransportFactory;

    fn connection() -> ClientConnection {
        ClientConnection {
            connection_name: "plant-a".to_string(),
            url: "opc.tcp://10.0.4.20:4840".to_string(),
            browse_exclusion_folders: vec!["Server".to_string()],
            max_search: 4,
            timeout_ms: 15_000,
            username: None,
            encrypted_password: None,
            auto_accept_first_update: true,
            monitored: true,
            tcp_probe: TcpProbeConfig::default(),
        }
    }

    fn object_ref(id: &str, name: &str) -> BrowseRef {
        BrowseRef {
            node_id: id.into(),
            display_name: name.into(),
            node_class: NodeClass::Object,
        }
    }

    #[tokio::test]
    async fn job_writes_catalog_and_clears_sentinel() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(InMemoryTransportFactory::new());
        let manager = BrowseJobManager::new(
            dir.path(),
            factory.clone() as Arc<dyn TransportFactory>,
        );

        factory.seed_namespace(
            "opc.tcp://10.0.4.20:4840",
            "i=85",
            vec![
                object_ref("ns=2;s=Plant", "Plant"),
                object_ref("ns=2;s=Server", "Server"),
            ],
        );
        manager.start_job(&connection()).unwrap();

        let paths = BrowseJobPaths::new(dir.path(), "plant-a");
        while !paths.output().exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!paths.job_running());
        assert!(!manager.is_job_running("plant-a"));

        let raw = std::fs::read_to_string(paths.output()).unwrap();
        assert!(raw.contains("Plant"));
        assert!(!raw.contains("\"Server\""));
    }

    #[tokio::test]
    async fn duplicate_job_fails_fast() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(InMemoryTransportFactory::new());
        let manager = BrowseJobManager::new(
            dir.path(),
            factory.clone() as Arc<dyn TransportFactory>,
        );

        // A sentinel left by another process also counts as running.
        let paths = BrowseJobPaths::new(dir.path(), "plant-a");
        std::fs::create_dir_all(paths.dir()).unwrap();
        std::fs::write(paths.sentinel(), "{}").unwrap();

        assert!(manager.is_job_running("plant-a"));
        let err = manager.start_job(&connection()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Protocol(OpcUaError::Browse(
                BrowseError::JobAlreadyRunning { .. }
            ))
        ));
    }
}
