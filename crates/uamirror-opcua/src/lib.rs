// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamirror-opcua
//!
//! OPC UA protocol layer for the uamirror gateway.
//!
//! The crate is organized around a transport seam:
//!
//! ```text
//!   +--------------------+     +---------------------+
//!   | SessionFactory     |     | browse engine       |
//!   | (connect + backoff)|     | (bounded-DFS crawl) |
//!   +---------+----------+     +----------+----------+
//!             |                           |
//!             v                           v
//!   +------------------------------------------------+
//!   |             OpcUaTransport (trait)             |
//!   +-----------------------+------------------------+
//!                           |
//!          +----------------+-----------------+
//!          v                                  v
//!   InMemoryTransport                RealOpcUaTransport
//!   (tests, dev mode)            (feature "real-transport")
//! ```
//!
//! - [`types`]: node ids, node classes, session configuration
//! - [`client`]: transport trait, session factory, subscription model
//! - [`browse`]: namespace crawl with a worker budget and jsTree output
//! - [`error`]: error hierarchy with retryability classification

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod browse;
pub mod client;
pub mod error;
pub mod types;

pub use browse::{run_browse_job, BrowseJobPaths, BrowseOptions, JsTreeDocument, JsTreeNode};
pub use client::session::{SessionFactory, SessionStats};
pub use client::subscription::{
    DataChangeNotification, MonitoredItemRequest, SubscriptionSettings,
};
pub use client::transport::{BrowseRef, OpcUaTransport, OpcUaValue, StatusCode, TransportState};
pub use client::InMemoryTransport;
pub use error::{BrowseError, ConnectionError, OpcUaError, OpcUaResult, SubscriptionError};
pub use types::{Identity, NodeClass, NodeId, SessionConfig};

// Re-export real transport when the feature is enabled
#[cfg(feature = "real-transport")]
pub use client::RealOpcUaTransport;
