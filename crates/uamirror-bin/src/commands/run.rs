// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `run` subcommand: start the gateway.

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;

/// Assemble the runtime and run it to completion.
pub async fn execute(cli: &Cli, args: &RunArgs) -> BinResult<()> {
    let runtime = RuntimeBuilder::new()
        .config_path(&cli.config)
        .dev_mode(args.dev_mode)
        .build()
        .await?;

    runtime.run().await
}
