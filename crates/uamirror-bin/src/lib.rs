// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-bin
//!
//! The `uamirror` command-line binary.
//!
//! Subcommands:
//!
//! | Command | Purpose |
//! |---|---|
//! | `run` (default) | start the gateway |
//! | `validate` | cross-check the configuration documents |
//! | `browse <connection>` | write a server's node catalog |
//! | `gen-key` | generate a password encryption key |
//! | `encrypt [password]` | encrypt a password for the connection list |
//! | `version` | print version and build information |
//!
//! The binary itself stays thin: parse, init logging, dispatch. All
//! gateway behavior lives in the library crates.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use cli::{Cli, Commands, LogFormat};
pub use error::{BinError, BinResult};
pub use runtime::{GatewayRuntime, RuntimeBuilder};
pub use shutdown::ShutdownCoordinator;

/// Binary version, from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name.
pub const NAME: &str = "uamirror";
