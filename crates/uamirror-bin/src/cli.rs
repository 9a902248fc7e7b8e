// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line interface definition.
//!
//! Everything the binary can do is declared here as a [`clap`] derive
//! tree. No subcommand defaults to `run`, so a bare `uamirror` starts
//! the gateway.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

// =============================================================================
// Top-Level CLI
// =============================================================================

/// OPC UA acquisition gateway: subscribes to plant servers and mirrors
/// scaled measure values into the `modvalues` table.
#[derive(Debug, Parser)]
#[command(name = "uamirror", version, about, long_about = None)]
pub struct Cli {
    /// Configuration directory holding the four gateway JSON documents
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        env = "UAMIRROR_CONFIG_DIR",
        default_value = uamirror_config::DEFAULT_CONFIG_DIR,
        value_name = "DIR"
    )]
    pub config: PathBuf,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        env = "UAMIRROR_LOG_LEVEL",
        default_value = "info",
        value_name = "LEVEL"
    )]
    pub log_level: String,

    /// Log output format
    #[arg(
        long = "log-format",
        global = true,
        env = "UAMIRROR_LOG_FORMAT",
        default_value = "text",
        value_name = "FORMAT"
    )]
    pub log_format: LogFormat,

    /// Suppress all output except warnings and errors
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Enable verbose (debug) output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The command to execute, defaulting to [`Commands::Run`].
    pub fn effective_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run(RunArgs::default()))
    }

    /// Effective log level after applying `--quiet` / `--verbose`.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text with timestamps
    Text,
    /// Newline-delimited JSON, one event per line
    Json,
    /// Compact single-line text
    Compact,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Start the gateway (default when no subcommand is given)
    Run(RunArgs),

    /// Validate the configuration documents and exit
    Validate(ValidateArgs),

    /// Browse a server's address space and write its node catalog
    Browse(BrowseArgs),

    /// Generate a fresh base64 AES-256 password encryption key
    GenKey,

    /// Encrypt a password for the connection document
    Encrypt(EncryptArgs),

    /// Print version and build information
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// Run against an in-memory transport and value store (no server
    /// or database required)
    #[arg(long = "dev")]
    pub dev_mode: bool,
}

/// Arguments for the `validate` subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ValidateArgs {
    /// Treat warnings as errors
    #[arg(long = "strict")]
    pub strict: bool,

    /// Emit the report as JSON instead of text
    #[arg(long = "json")]
    pub json: bool,
}

/// Arguments for the `browse` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct BrowseArgs {
    /// Connection name from `opcua_client_config.json`
    #[arg(value_name = "CONNECTION")]
    pub connection: String,
}

/// Arguments for the `encrypt` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct EncryptArgs {
    /// Plaintext password to encrypt. Read from stdin when omitted.
    #[arg(value_name = "PASSWORD")]
    pub password: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
