// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-core
//!
//! Shared foundation for the uamirror OPC UA data-acquisition gateway.
//!
//! This crate holds the pieces every other crate needs and none should
//! own exclusively:
//!
//! - [`types`]: identity types for devices and measures, and the row
//!   structures handed from the subscription side to the value sink
//! - [`scaling`]: the two-mode linear transform applied to raw protocol
//!   values before they are persisted
//! - [`retry`]: bounded retry with fixed or exponential delay, used by
//!   the config loader, session factory, and database writer
//!
//! # Layering
//!
//! ```text
//!                  uamirror-bin
//!                       |
//!                uamirror-engine
//!               /       |        \
//!   uamirror-opcua  uamirror-sink  uamirror-config
//!               \       |        /
//!                 uamirror-core
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod retry;
pub mod scaling;
pub mod types;

pub use retry::{RetryConfig, RetryDelay};
pub use scaling::{AutoScaling, ScaleMode, ScalingError};
pub use types::{MeasureUpdate, RowSeed, ONLINE_MEASURE};
