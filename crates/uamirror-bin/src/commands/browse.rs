// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `browse` subcommand: one-shot address-space catalog for a
//! configured connection.

use std::time::Duration;

use uamirror_config::ConfigLoader;
use uamirror_engine::{BrowseJobManager, EngineError};
use uamirror_opcua::BrowseJobPaths;

use crate::cli::{BrowseArgs, Cli};
use crate::error::{BinError, BinResult};
use crate::runtime;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Start a browse job for the named connection and wait for it to
/// finish.
pub async fn execute(cli: &Cli, args: &BrowseArgs) -> BinResult<()> {
    let loader = ConfigLoader::new(&cli.config);
    let snapshot = loader.load_snapshot().await?;
    let connection = snapshot
        .connection(&args.connection)
        .ok_or_else(|| EngineError::unknown_connection(&args.connection))?;

    let transports = runtime::real_transport_factory()?;
    let mut manager = BrowseJobManager::new(cli.config.clone(), transports);
    if let Some(encryptor) = runtime::load_encryptor()? {
        manager = manager.with_encryptor(encryptor);
    }

    manager.start_job(connection)?;
    println!("browsing '{}' at {} ...", connection.connection_name, connection.url);

    while manager.is_job_running(&args.connection) {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let paths = BrowseJobPaths::new(&cli.config, &args.connection);
    let output = paths.output();
    if output.exists() {
        println!("catalog written to {}", output.display());
        Ok(())
    } else {
        Err(BinError::runtime(format!(
            "browse job for '{}' produced no catalog; see {}",
            args.connection,
            paths.errors().display()
        )))
    }
}
