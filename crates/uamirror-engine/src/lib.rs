// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-engine
//!
//! The subscription engine: keeps one live OPC UA subscription per
//! configured server, mirrors every accepted value into the value store,
//! and self-heals on connection loss.
//!
//! ```text
//!   config snapshot
//!        |
//!        v  build_plans
//!   SubscriptionPlan xN
//!        |
//!        v  one task per connection
//!   +---------------------+     +----------------+
//!   | ConnectionSupervisor| --> | ValueStore     |
//!   | (phase machine,     |     | (scaled rows + |
//!   |  watchdog, probe)   |     |  online flags) |
//!   +---------------------+     +----------------+
//!        ^
//!        |  reload token per run
//!   SubscriptionEngine (hot reload, shutdown)
//! ```
//!
//! - [`builder`]: inventory x templates to per-connection plans
//! - [`connection`]: the per-server supervisor state machine
//! - [`watchdog`]: silence detection with sweep-decoupled feeding
//! - [`probe`]: raw TCP reachability polling
//! - [`engine`]: run lifecycle, hot reload, transport factory seam
//! - [`jobs`]: single-flight browse job orchestration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod connection;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod probe;
pub mod watchdog;

pub use builder::{build_plans, DevicePlan, PointBinding, SubscriptionPlan};
pub use connection::{ConnectionSupervisor, SupervisorSettings};
pub use engine::{
    session_config_for, InMemoryTransportFactory, ReloadHandle, SubscriptionEngine,
    TransportFactory,
};
pub use error::{EngineError, EngineResult};
pub use jobs::BrowseJobManager;
pub use watchdog::{Watchdog, WatchdogFeeder};
