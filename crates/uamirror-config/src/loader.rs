// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration snapshot loading and change watching.
//!
//! The configuration directory is written by external tooling that does
//! not coordinate with this process, so a read can observe a truncated
//! file mid-write. Every document read therefore goes through a bounded
//! retry with a short fixed delay; a parse error that survives the retry
//! budget is a real error.
//!
//! Reloads replace the whole [`ConfigSnapshot`] wholesale. Nothing
//! mutates a snapshot in place, so in-flight readers always see a
//! consistent document set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use uamirror_core::retry::{retry_if, RetryConfig, RetryDelay};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{
    ClientConnection, PlantConfig, PointTemplates, SiteDevices, CLIENT_CONFIG_FILE, DEVICES_FILE,
    PLANT_CONFIG_FILE, TEMPLATES_FILE,
};

// =============================================================================
// ConfigSnapshot
// =============================================================================

/// An immutable view of all four configuration documents.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Server connection list.
    pub connections: Vec<ClientConnection>,
    /// Device inventory by device type.
    pub devices: SiteDevices,
    /// Point templates by device type and template name.
    pub templates: PointTemplates,
    /// Database credentials.
    pub plant: PlantConfig,
}

impl ConfigSnapshot {
    /// Looks up a connection by name.
    pub fn connection(&self, name: &str) -> Option<&ClientConnection> {
        self.connections.iter().find(|c| c.connection_name == name)
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads configuration documents from a directory with bounded retry.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    retry: RetryConfig,
}

impl ConfigLoader {
    /// Creates a loader for the given configuration directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retry: RetryConfig::new(3)
                .with_delay(RetryDelay::Fixed)
                .with_initial_delay(Duration::from_millis(200)),
        }
    }

    /// Overrides the read retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The configuration directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of a document in the configuration directory.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Loads all four documents into a fresh snapshot.
    pub async fn load_snapshot(&self) -> ConfigResult<ConfigSnapshot> {
        let connections: Vec<ClientConnection> = self.read_json(CLIENT_CONFIG_FILE).await?;
        for conn in &connections {
            conn.validate()?;
        }
        let devices: SiteDevices = self.read_json(DEVICES_FILE).await?;
        let templates: PointTemplates = self.read_json(TEMPLATES_FILE).await?;
        let plant: PlantConfig = self.read_json(PLANT_CONFIG_FILE).await?;

        info!(
            connections = connections.len(),
            device_types = devices.len(),
            template_types = templates.len(),
            "configuration snapshot loaded"
        );

        Ok(ConfigSnapshot {
            connections,
            devices,
            templates,
            plant,
        })
    }

    /// Reads and parses one JSON document, retrying transient failures.
    pub async fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> ConfigResult<T> {
        let path = self.path_of(file_name);
        let mut op = || {
            let path = path.clone();
            async move { read_json_once(&path).await }
        };
        retry_if(&self.retry, file_name, &mut op, ConfigError::is_retryable).await
    }
}

async fn read_json_once<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::parse(path, e.to_string()))
}

// =============================================================================
// ConfigWatcher
// =============================================================================

/// Polls the subscription-relevant documents for changes.
///
/// Watches the connection list, device inventory, and template documents
/// (not the database credentials, which are only read at startup). A
/// change is a differing (mtime, length) pair; either alone can be
/// unreliable on coarse-grained filesystems.
#[derive(Debug)]
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    seen: HashMap<PathBuf, (Option<SystemTime>, u64)>,
    poll_interval: Duration,
}

/// Documents observed by the watcher.
const WATCHED_FILES: [&str; 3] = [CLIENT_CONFIG_FILE, DEVICES_FILE, TEMPLATES_FILE];

impl ConfigWatcher {
    /// Creates a watcher over the given configuration directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let paths: Vec<PathBuf> = WATCHED_FILES.iter().map(|f| dir.join(f)).collect();
        let mut watcher = Self {
            paths,
            seen: HashMap::new(),
            poll_interval: Duration::from_secs(1),
        };
        // Prime the baseline so pre-existing files do not count as a change.
        let _ = watcher.poll_changed();
        watcher
    }

    /// Overrides the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks all watched files once; true if any changed since the
    /// previous call.
    pub fn poll_changed(&mut self) -> bool {
        let mut changed = false;
        for path in &self.paths {
            let current = match std::fs::metadata(path) {
                Ok(meta) => (meta.modified().ok(), meta.len()),
                // A missing file is a state too; its appearance later is a change.
                Err(_) => (None, 0),
            };
            match self.seen.get(path) {
                Some(previous) if *previous == current => {}
                Some(_) => {
                    debug!(path = %path.display(), "configuration file changed");
                    changed = true;
                    self.seen.insert(path.clone(), current);
                }
                None => {
                    self.seen.insert(path.clone(), current);
                }
            }
        }
        changed
    }

    /// Resolves once any watched document changes.
    pub async fn changed(&mut self) {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.poll_changed() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn seed_config_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            CLIENT_CONFIG_FILE,
            r#"[{"connectionName": "plant-a", "url": "opc.tcp://localhost:4840"}]"#,
        );
        write_file(
            dir.path(),
            DEVICES_FILE,
            r#"{"inverter": [{
                "daq_name": "inv1",
                "daq_template": "basic",
                "device_type": "inverter",
                "network": {"params": {
                    "protocol": "opcua",
                    "prefix": "INV1_",
                    "server": "plant-a",
                    "point_node": "ns=2;s=Devices"
                }}
            }]}"#,
        );
        write_file(
            dir.path(),
            TEMPLATES_FILE,
            r#"{"inverter": {"basic": [{
                "unit": "W", "name": "W", "measure": "power",
                "autoScaling": {"scale_mode": "slope_intercept"}
            }]}}"#,
        );
        write_file(dir.path(), PLANT_CONFIG_FILE, r#"{}"#);
        dir
    }

    #[tokio::test]
    async fn loads_full_snapshot() {
        let dir = seed_config_dir();
        let loader = ConfigLoader::new(dir.path());
        let snapshot = loader.load_snapshot().await.unwrap();

        assert_eq!(snapshot.connections.len(), 1);
        assert!(snapshot.connection("plant-a").is_some());
        assert!(snapshot.connection("plant-b").is_none());
        assert_eq!(snapshot.devices["inverter"][0].daq_name, "inv1");
        assert_eq!(snapshot.plant.db.port, "5432");
    }

    #[tokio::test]
    async fn truncated_document_errors_after_retries() {
        let dir = seed_config_dir();
        write_file(dir.path(), DEVICES_FILE, r#"{"inverter": [{"daq_na"#);

        let loader = ConfigLoader::new(dir.path()).with_retry(
            RetryConfig::new(2)
                .with_delay(RetryDelay::Fixed)
                .with_initial_delay(Duration::from_millis(1)),
        );
        let err = loader.load_snapshot().await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new(dir.path()).with_retry(
            RetryConfig::new(1).with_initial_delay(Duration::from_millis(1)),
        );
        let err = loader
            .read_json::<Vec<ClientConnection>>(CLIENT_CONFIG_FILE)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn watcher_reports_changes_only_once() {
        let dir = seed_config_dir();
        let mut watcher = ConfigWatcher::new(dir.path());

        // Baseline primed in the constructor.
        assert!(!watcher.poll_changed());

        write_file(
            dir.path(),
            CLIENT_CONFIG_FILE,
            r#"[{"connectionName": "plant-a", "url": "opc.tcp://localhost:4840", "maxSearch": 8}]"#,
        );
        assert!(watcher.poll_changed());
        assert!(!watcher.poll_changed());
    }

    #[test]
    fn watcher_ignores_unwatched_files() {
        let dir = seed_config_dir();
        let mut watcher = ConfigWatcher::new(dir.path());
        assert!(!watcher.poll_changed());

        write_file(dir.path(), PLANT_CONFIG_FILE, r#"{"modvalues_db_config": {}}"#);
        assert!(!watcher.poll_changed());
    }
}
