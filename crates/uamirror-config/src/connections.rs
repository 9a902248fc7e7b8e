// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CRUD over the connection list document.
//!
//! This is the surface the external configuration layer calls after
//! editing connections; it owns the `opcua_client_config.json` document
//! and the password encryption around it. Every mutation rewrites the
//! document atomically (write a sibling temp file, then rename) so the
//! subscription engine's change watcher never observes a half-written
//! list.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::encryption::Encryptor;
use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ClientConnection, CLIENT_CONFIG_FILE};

/// Connection list store.
pub struct ConnectionStore {
    path: PathBuf,
    encryptor: Encryptor,
}

impl ConnectionStore {
    /// Creates a store over `<config_dir>/opcua_client_config.json`.
    pub fn new(config_dir: impl AsRef<Path>, encryptor: Encryptor) -> Self {
        Self {
            path: config_dir.as_ref().join(CLIENT_CONFIG_FILE),
            encryptor,
        }
    }

    /// Loads the full connection list.
    pub async fn load(&self) -> ConfigResult<Vec<ClientConnection>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::parse(&self.path, e.to_string()))
    }

    /// Adds a connection. `password`, when given, is encrypted at rest.
    ///
    /// Fails with [`ConfigError::DuplicateConnection`] if the name is
    /// already taken.
    pub async fn add(
        &self,
        mut connection: ClientConnection,
        password: Option<&str>,
    ) -> ConfigResult<()> {
        connection.validate_with_password(password)?;

        let mut connections = self.load().await?;
        if connections
            .iter()
            .any(|c| c.connection_name == connection.connection_name)
        {
            return Err(ConfigError::duplicate_connection(&connection.connection_name));
        }

        if let Some(password) = password {
            connection.encrypted_password = Some(self.encryptor.encrypt(password)?);
        }

        info!(connection = %connection.connection_name, "adding connection");
        connections.push(connection);
        self.save(&connections).await
    }

    /// Replaces the connection with the same name.
    ///
    /// When `password` is `None` the previously stored encrypted
    /// password is kept, so callers never need to round-trip secrets.
    pub async fn update(
        &self,
        mut connection: ClientConnection,
        password: Option<&str>,
    ) -> ConfigResult<()> {
        connection.validate_with_password(password)?;

        let mut connections = self.load().await?;
        let existing = connections
            .iter_mut()
            .find(|c| c.connection_name == connection.connection_name)
            .ok_or_else(|| ConfigError::connection_not_found(&connection.connection_name))?;

        connection.encrypted_password = match password {
            Some(password) => Some(self.encryptor.encrypt(password)?),
            None => existing.encrypted_password.take(),
        };

        info!(connection = %connection.connection_name, "updating connection");
        *existing = connection;
        self.save(&connections).await
    }

    /// Removes a connection by name.
    pub async fn remove(&self, name: &str) -> ConfigResult<()> {
        let mut connections = self.load().await?;
        let before = connections.len();
        connections.retain(|c| c.connection_name != name);
        if connections.len() == before {
            return Err(ConfigError::connection_not_found(name));
        }

        info!(connection = name, "removing connection");
        self.save(&connections).await
    }

    /// Decrypts a stored password; an absent password is the empty string.
    pub fn decrypt_password(&self, encrypted: Option<&str>) -> ConfigResult<String> {
        match encrypted {
            Some(value) => self.encryptor.decrypt(value),
            None => Ok(String::new()),
        }
    }

    async fn save(&self, connections: &[ClientConnection]) -> ConfigResult<()> {
        let rendered = serde_json::to_string_pretty(connections)
            .map_err(|e| ConfigError::parse(&self.path, e.to_string()))?;

        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, rendered.as_bytes())
            .await
            .map_err(|e| ConfigError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))?;
        Ok(())
    }
}

impl ClientConnection {
    /// Validation that also covers the plaintext password pairing rule.
    fn validate_with_password(&self, password: Option<&str>) -> ConfigResult<()> {
        if password.is_some() && self.username.is_none() {
            return Err(ConfigError::validation(
                "username",
                "password supplied without a username",
            ));
        }
        // The plaintext password never lands in the stored document.
        if self.encrypted_password.is_some() && password.is_some() {
            return Err(ConfigError::validation(
                "encryptedPassword",
                "supply either a plaintext password or an encrypted one, not both",
            ));
        }
        self.validate()
    }
}
