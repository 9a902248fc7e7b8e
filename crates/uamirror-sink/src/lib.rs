// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-sink
//!
//! Last-known-value sink for the uamirror gateway.
//!
//! One table, `modvalues`, holds exactly one row per `(device, measure)`
//! pair: the latest raw tag value, the scaled measure value, units, a
//! textual ISO-8601 `last_updated` stamp, and a synthetic per-device
//! online measure. The gateway only ever updates in place; rows are
//! created lazily at subscription build time and never deleted here.
//!
//! The crate is split along a storage seam:
//!
//! - [`traits::ValueStore`]: the operations the subscription engine needs
//! - [`postgres::PgValueStore`]: production backend with per-row locking
//!   inside short transactions and bounded write retries
//! - [`memory::MemoryValueStore`]: in-process backend for tests and dev
//!   mode
//! - [`keepalive`]: the periodic sweep re-stamping online devices

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod keepalive;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{SinkError, SinkResult};
pub use keepalive::spawn_keepalive;
pub use memory::MemoryValueStore;
pub use postgres::PgValueStore;
pub use traits::{SinkStats, SinkStatsSnapshot, ValueRow, ValueStore};
