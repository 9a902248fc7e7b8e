// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary-level error type and exit-code mapping.

use thiserror::Error;

/// Result alias for binary operations.
pub type BinResult<T> = Result<T, BinError>;

/// Top-level error for the `uamirror` binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration documents are missing, unreadable, or invalid.
    #[error(transparent)]
    Config(#[from] uamirror_config::ConfigError),

    /// A gateway component failed.
    #[error(transparent)]
    Engine(#[from] uamirror_engine::EngineError),

    /// The value store could not be reached or written.
    #[error(transparent)]
    Sink(#[from] uamirror_sink::SinkError),

    /// A component could not be constructed at startup.
    #[error("initialization error: {message}")]
    Initialization {
        /// What failed to initialize.
        message: String,
    },

    /// An unrecoverable runtime fault.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the fault.
        message: String,
    },

    /// Filesystem or terminal I/O failure.
    #[error("i/o error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl BinError {
    /// Create an initialization error.
    pub fn init(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Create a runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Process exit code for this error, for service supervisors that
    /// key restart policy on it.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,         // EX_CONFIG
            Self::Initialization { .. } => 69, // EX_UNAVAILABLE
            Self::Io { .. } => 74,         // EX_IOERR
            Self::Engine(_) | Self::Sink(_) | Self::Runtime { .. } => 1,
        }
    }
}

/// Print an error with its cause chain and terminate the process.
pub fn report_error_and_exit(error: BinError) -> ! {
    eprintln!("error: {error}");

    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }

    std::process::exit(error.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_ex_config() {
        let err = BinError::from(uamirror_config::ConfigError::parse(
            "/opt/sos-config/plant_config.json",
            "unexpected EOF",
        ));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn runtime_errors_exit_nonzero() {
        assert_eq!(BinError::runtime("engine stopped").exit_code(), 1);
        assert_eq!(BinError::init("no transport backend").exit_code(), 69);
    }
}
