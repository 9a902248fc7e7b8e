// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `version` subcommand.

use crate::error::BinResult;

/// Print version and build information.
pub fn execute() -> BinResult<()> {
    println!("uamirror {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("features:");
    println!(
        "  real-transport: {}",
        if cfg!(feature = "real-transport") {
            "enabled"
        } else {
            "disabled (dev mode only)"
        }
    );
    println!();
    println!("license: PolyForm-Noncommercial-1.0.0");
    Ok(())
}
