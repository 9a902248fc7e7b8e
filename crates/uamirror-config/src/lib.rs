// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-config
//!
//! Configuration management for the uamirror OPC UA gateway.
//!
//! The gateway is driven by four JSON documents in a single configuration
//! directory (default `/opt/sos-config`):
//!
//! | File | Content |
//! |---|---|
//! | `opcua_client_config.json` | server connection list |
//! | `site_devices.json` | device inventory, grouped by device type |
//! | `sos_templates_opcua.json` | point templates per device type |
//! | `plant_config.json` | database credentials |
//!
//! Modules:
//!
//! - [`schema`]: document structures with serde derives and validation
//! - [`loader`]: snapshot loading with bounded retry (concurrent writers
//!   may leave a file briefly truncated) and a polling change watcher
//! - [`encryption`]: AES-256-GCM for the password field
//! - [`connections`]: CRUD over the connection list for the external
//!   configuration surface
//!
//! # Quick Start
//!
//! ```no_run
//! use uamirror_config::loader::ConfigLoader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ConfigLoader::new("/opt/sos-config");
//! let snapshot = loader.load_snapshot().await?;
//! println!("{} connections", snapshot.connections.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod connections;
pub mod encryption;
pub mod error;
pub mod loader;
pub mod schema;

pub use connections::ConnectionStore;
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ConfigSnapshot, ConfigWatcher};
pub use schema::{
    ClientConnection, DbConnection, PlantConfig, SiteDevice, TemplatePoint,
    DEFAULT_CONFIG_DIR,
};
