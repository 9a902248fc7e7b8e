// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory transport.
//!
//! Backs tests and dev mode. Holds a scriptable namespace tree and lets
//! callers publish data changes as if a server pushed them. Failure
//! injection covers the paths the engine has to survive: refused
//! connects, rejected credentials, failing browse calls, and slow
//! browse responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::error::{ConnectionError, OpcUaError, OpcUaResult, SubscriptionError};
use crate::types::{NodeId, SessionConfig};

use super::subscription::{
    DataChangeNotification, MonitoredItemId, MonitoredItemRequest, SubscriptionId,
    SubscriptionSettings,
};
use super::transport::{BrowseRef, OpcUaTransport, TransportState};

/// Scriptable in-memory transport.
pub struct InMemoryTransport {
    config: SessionConfig,
    state: RwLock<TransportState>,

    // Failure scripting
    fail_connects: AtomicU32,
    reject_auth: AtomicBool,
    connect_attempts: AtomicU32,
    browse_failures: Mutex<HashMap<NodeId, u32>>,
    browse_delay: Mutex<Option<Duration>>,

    // Namespace tree: parent -> children
    tree: Mutex<HashMap<NodeId, Vec<BrowseRef>>>,

    // Active subscriptions
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
    subscriptions: Mutex<HashMap<u32, SubscriptionRecord>>,
}

struct SubscriptionRecord {
    sink: mpsc::Sender<DataChangeNotification>,
    items: Vec<MonitoredItemRequest>,
}

impl InMemoryTransport {
    /// Creates a transport for the given session configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TransportState::Disconnected),
            fail_connects: AtomicU32::new(0),
            reject_auth: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            browse_failures: Mutex::new(HashMap::new()),
            browse_delay: Mutex::new(None),
            tree: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU32::new(1),
            next_item_id: AtomicU32::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Makes the next `n` connect attempts fail with a refused error.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Makes every connect attempt fail with rejected credentials.
    pub fn reject_authentication(&self) {
        self.reject_auth.store(true, Ordering::SeqCst);
    }

    /// Number of connect attempts observed.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Makes the next `times` browses of `node` fail.
    pub fn fail_browse_of(&self, node: impl Into<NodeId>, times: u32) {
        self.browse_failures.lock().insert(node.into(), times);
    }

    /// Delays every browse response, for deadline tests.
    pub fn set_browse_delay(&self, delay: Duration) {
        *self.browse_delay.lock() = Some(delay);
    }

    /// Registers `children` under `parent` in the namespace tree.
    pub fn set_children(&self, parent: impl Into<NodeId>, children: Vec<BrowseRef>) {
        self.tree.lock().insert(parent.into(), children);
    }

    /// Publishes a data change to every active subscription.
    ///
    /// Returns how many subscriptions received it.
    pub async fn publish(&self, notification: DataChangeNotification) -> usize {
        let sinks: Vec<mpsc::Sender<DataChangeNotification>> = {
            let subs = self.subscriptions.lock();
            subs.values().map(|r| r.sink.clone()).collect()
        };
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(notification.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// All monitored item requests currently registered, across
    /// subscriptions, in registration order.
    pub fn monitored_items(&self) -> Vec<MonitoredItemRequest> {
        let subs = self.subscriptions.lock();
        let mut ids: Vec<&u32> = subs.keys().collect();
        ids.sort();
        ids.iter()
            .flat_map(|id| subs[id].items.iter().cloned())
            .collect()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

#[async_trait]
impl OpcUaTransport for InMemoryTransport {
    async fn connect(&self) -> OpcUaResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.reject_auth.load(Ordering::SeqCst) {
            *self.state.write().await = TransportState::Failed;
            return Err(ConnectionError::authentication_rejected(
                &self.config.endpoint,
                "identity token rejected",
            )
            .into());
        }

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            *self.state.write().await = TransportState::Failed;
            return Err(
                ConnectionError::failed(&self.config.endpoint, "connection refused").into(),
            );
        }

        *self.state.write().await = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        // Subscriptions die with the session.
        self.subscriptions.lock().clear();
        *self.state.write().await = TransportState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    async fn browse(&self, node: &NodeId) -> OpcUaResult<Vec<BrowseRef>> {
        if !self.state.read().await.is_connected() {
            return Err(ConnectionError::not_connected(&self.config.endpoint).into());
        }

        let delay = *self.browse_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.browse_failures.lock();
            if let Some(remaining) = failures.get_mut(node) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(OpcUaError::operation(
                        "browse",
                        format!("scripted failure for {node}"),
                    ));
                }
            }
        }

        Ok(self.tree.lock().get(node).cloned().unwrap_or_default())
    }

    async fn create_subscription(
        &self,
        _settings: &SubscriptionSettings,
        sink: mpsc::Sender<DataChangeNotification>,
    ) -> OpcUaResult<SubscriptionId> {
        if !self.state.read().await.is_connected() {
            return Err(ConnectionError::not_connected(&self.config.endpoint).into());
        }
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .insert(id, SubscriptionRecord { sink, items: Vec::new() });
        Ok(SubscriptionId(id))
    }

    async fn add_monitored_items(
        &self,
        subscription: SubscriptionId,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemId>> {
        if !self.state.read().await.is_connected() {
            return Err(ConnectionError::not_connected(&self.config.endpoint).into());
        }
        let mut subs = self.subscriptions.lock();
        let record = subs.get_mut(&subscription.0).ok_or(OpcUaError::Subscription(
            SubscriptionError::UnknownSubscription { id: subscription.0 },
        ))?;

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            record.items.push(item.clone());
            ids.push(MonitoredItemId(self.next_item_id.fetch_add(1, Ordering::SeqCst)));
        }
        Ok(ids)
    }
}
