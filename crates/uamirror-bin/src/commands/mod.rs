// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subcommand implementations.

pub mod browse;
pub mod encrypt;
pub mod run;
pub mod validate;
pub mod version;

use crate::cli::{Cli, Commands};
use crate::error::BinResult;

/// Dispatch the parsed CLI to its subcommand.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => run::execute(&cli, &args).await,
        Commands::Validate(args) => validate::execute(&cli, &args).await,
        Commands::Browse(args) => browse::execute(&cli, &args).await,
        Commands::GenKey => encrypt::gen_key(),
        Commands::Encrypt(args) => encrypt::execute(&args),
        Commands::Version => version::execute(),
    }
}
