// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side protocol plumbing.
//!
//! - [`transport`]: the `OpcUaTransport` trait every backend implements
//! - [`session`]: session factory with connect retry and state tracking
//! - [`subscription`]: subscription settings, monitored items, and the
//!   data-change notification type
//! - [`mock`]: in-memory transport used by tests and dev mode

pub mod mock;
pub mod session;
pub mod subscription;
pub mod transport;

#[cfg(feature = "real-transport")]
mod real_transport;

pub use mock::InMemoryTransport;
pub use session::{SessionFactory, SessionStats};
pub use subscription::{
    DataChangeNotification, MonitoredItemId, MonitoredItemRequest, SubscriptionId,
    SubscriptionSettings,
};
pub use transport::{BrowseRef, OpcUaTransport, OpcUaValue, StatusCode, TransportState};

#[cfg(feature = "real-transport")]
pub use real_transport::RealOpcUaTransport;
