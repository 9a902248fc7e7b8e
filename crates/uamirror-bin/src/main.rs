// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `uamirror` entry point: parse, init logging, dispatch.

use uamirror_bin::error::report_error_and_exit;
use uamirror_bin::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    logging::init_logging(cli.effective_log_level(), cli.log_format);

    if let Err(error) = commands::execute(cli).await {
        report_error_and_exit(error);
    }
}
