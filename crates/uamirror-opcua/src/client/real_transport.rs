// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Real OPC UA transport backed by the `opcua` crate.
//!
//! Endpoint selection runs without security, matching the field profile
//! this gateway targets (plant-local networks behind their own
//! perimeter). Notification delivery bridges the library's callback
//! thread into the subscription sink with a blocking send.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;

use crate::error::{
    ConnectionError, OpcUaError, OpcUaResult, SubscriptionError,
};
use crate::types::{Identity, NodeClass, NodeId, SessionConfig};

use super::subscription::{
    DataChangeNotification, MonitoredItemId, MonitoredItemRequest, SubscriptionId,
    SubscriptionSettings,
};
use super::transport::{BrowseRef, OpcUaTransport, OpcUaValue, StatusCode, TransportState};

/// Production transport over the `opcua` crate.
pub struct RealOpcUaTransport {
    config: SessionConfig,
    state: RwLock<TransportState>,
    session: RwLock<Option<Arc<OpcUaRwLock<Session>>>>,
    next_client_handle: AtomicU32,
}

impl RealOpcUaTransport {
    /// Creates a transport for the given session configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TransportState::Disconnected),
            session: RwLock::new(None),
            next_client_handle: AtomicU32::new(1),
        }
    }

    fn build_client(&self) -> OpcUaResult<Client> {
        ClientBuilder::new()
            .application_name(&self.config.application_name)
            .application_uri(format!("urn:{}", self.config.application_name))
            .session_timeout(self.config.session_timeout.as_millis() as u32)
            .session_retry_limit(0)
            .trust_server_certs(true)
            .create_sample_keypair(true)
            .client()
            .ok_or_else(|| {
                ConnectionError::invalid_endpoint(
                    &self.config.endpoint,
                    "failed to build protocol client",
                )
                .into()
            })
    }

    fn identity_token(&self) -> IdentityToken {
        match &self.config.identity {
            Identity::Anonymous => IdentityToken::Anonymous,
            Identity::UsernamePassword { username, password } => {
                IdentityToken::UserName(username.clone(), password.clone())
            }
        }
    }

    fn to_protocol_node_id(node_id: &NodeId) -> opcua::types::NodeId {
        opcua::types::NodeId::from_str(node_id.as_str())
            // Computed ids concatenate path fragments and may not parse;
            // treat those as ns=0 string identifiers.
            .unwrap_or_else(|_| opcua::types::NodeId::new(0, node_id.as_str()))
    }

    fn from_protocol_node_id(node_id: &opcua::types::NodeId) -> NodeId {
        NodeId::new(node_id.to_string())
    }

    fn from_variant(variant: &Variant) -> OpcUaValue {
        match variant {
            Variant::Empty => OpcUaValue::Null,
            Variant::Boolean(v) => OpcUaValue::Boolean(*v),
            Variant::SByte(v) => OpcUaValue::Integer(*v as i64),
            Variant::Byte(v) => OpcUaValue::UInteger(*v as u64),
            Variant::Int16(v) => OpcUaValue::Integer(*v as i64),
            Variant::UInt16(v) => OpcUaValue::UInteger(*v as u64),
            Variant::Int32(v) => OpcUaValue::Integer(*v as i64),
            Variant::UInt32(v) => OpcUaValue::UInteger(*v as u64),
            Variant::Int64(v) => OpcUaValue::Integer(*v),
            Variant::UInt64(v) => OpcUaValue::UInteger(*v),
            Variant::Float(v) => OpcUaValue::Double(*v as f64),
            Variant::Double(v) => OpcUaValue::Double(*v),
            Variant::String(v) => OpcUaValue::Text(v.as_ref().to_string()),
            other => OpcUaValue::Text(format!("{other:?}")),
        }
    }

    fn node_class_of(raw: opcua::types::NodeClass) -> NodeClass {
        match raw {
            opcua::types::NodeClass::Object => NodeClass::Object,
            opcua::types::NodeClass::Variable => NodeClass::Variable,
            opcua::types::NodeClass::Method => NodeClass::Method,
            _ => NodeClass::Unspecified,
        }
    }

    async fn session_handle(&self) -> OpcUaResult<Arc<OpcUaRwLock<Session>>> {
        let guard = self.session.read().await;
        guard
            .clone()
            .ok_or_else(|| ConnectionError::not_connected(&self.config.endpoint).into())
    }
}

#[async_trait]
impl OpcUaTransport for RealOpcUaTransport {
    async fn connect(&self) -> OpcUaResult<()> {
        *self.state.write().await = TransportState::Connecting;
        info!(endpoint = %self.config.endpoint, "connecting");

        let mut client = self.build_client()?;

        let endpoints = client
            .get_server_endpoints_from_url(&self.config.endpoint)
            .map_err(|e| {
                ConnectionError::failed(
                    &self.config.endpoint,
                    format!("endpoint discovery failed: {e}"),
                )
            })?;

        // Security disabled; pick the unsecured endpoint.
        let endpoint = endpoints
            .iter()
            .find(|e| {
                e.security_policy_uri.as_ref() == SecurityPolicy::None.to_uri()
                    && e.security_mode == MessageSecurityMode::None
            })
            .cloned()
            .ok_or_else(|| {
                ConnectionError::invalid_endpoint(
                    &self.config.endpoint,
                    "server offers no unsecured endpoint",
                )
            })?;

        debug!(endpoint_url = %endpoint.endpoint_url, "endpoint selected");

        let session = client
            .connect_to_endpoint(endpoint, self.identity_token())
            .map_err(|status| {
                let err: OpcUaError = if status == StatusCodes::BadIdentityTokenRejected
                    || status == StatusCodes::BadUserAccessDenied
                {
                    ConnectionError::authentication_rejected(
                        &self.config.endpoint,
                        status.to_string(),
                    )
                    .into()
                } else {
                    ConnectionError::failed(&self.config.endpoint, status.to_string()).into()
                };
                err
            })?;

        *self.session.write().await = Some(session);
        *self.state.write().await = TransportState::Connected;
        info!(endpoint = %self.config.endpoint, "connected");
        Ok(())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        if let Some(session) = self.session.write().await.take() {
            session.read().disconnect();
        }
        *self.state.write().await = TransportState::Disconnected;
        info!(endpoint = %self.config.endpoint, "disconnected");
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.read().await
    }

    async fn browse(&self, node: &NodeId) -> OpcUaResult<Vec<BrowseRef>> {
        let session = self.session_handle().await?;
        trace!(node = %node, "browsing");

        let description = BrowseDescription {
            node_id: Self::to_protocol_node_id(node),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: (opcua::types::NodeClassMask::OBJECT
                | opcua::types::NodeClassMask::VARIABLE)
                .bits(),
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };

        let results = {
            let session = session.read();
            session.browse(&[description]).map_err(|status| {
                OpcUaError::operation("browse", format!("{node}: {status}"))
            })?
        };

        let Some(results) = results else {
            return Ok(Vec::new());
        };
        let Some(result) = results.first() else {
            return Ok(Vec::new());
        };

        Ok(result
            .references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|r| BrowseRef {
                node_id: Self::from_protocol_node_id(&r.node_id.node_id),
                display_name: r.display_name.text.as_ref().to_string(),
                node_class: Self::node_class_of(r.node_class),
            })
            .collect())
    }

    async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
        sink: mpsc::Sender<DataChangeNotification>,
    ) -> OpcUaResult<SubscriptionId> {
        let session = self.session_handle().await?;

        let callback = DataChangeCallback::new(move |changed| {
            for item in changed {
                let value = &item.last_value();
                let notification = DataChangeNotification {
                    node_id: Self::from_protocol_node_id(
                        &item.item_to_monitor().node_id,
                    ),
                    value: value
                        .value
                        .as_ref()
                        .map(Self::from_variant)
                        .unwrap_or(OpcUaValue::Null),
                    status: StatusCode(value.status.map(|s| s.bits()).unwrap_or(0)),
                    source_timestamp: value.source_timestamp.map(|t| t.as_chrono()),
                };
                // Library callback thread; block rather than drop.
                if sink.blocking_send(notification).is_err() {
                    warn!("notification sink closed, dropping data change");
                }
            }
        });

        let subscription_id = {
            let session = session.read();
            session
                .create_subscription(
                    settings.publishing_interval.as_millis() as f64,
                    settings.lifetime_count,
                    10,
                    0,
                    0,
                    true,
                    callback,
                )
                .map_err(|status| {
                    OpcUaError::Subscription(SubscriptionError::create_failed(status.to_string()))
                })?
        };

        Ok(SubscriptionId(subscription_id))
    }

    async fn add_monitored_items(
        &self,
        subscription: SubscriptionId,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemId>> {
        let session = self.session_handle().await?;

        let requests: Vec<MonitoredItemCreateRequest> = items
            .iter()
            .map(|item| {
                let handle = self.next_client_handle.fetch_add(1, Ordering::SeqCst);
                MonitoredItemCreateRequest {
                    item_to_monitor: ReadValueId {
                        node_id: Self::to_protocol_node_id(&item.node_id),
                        attribute_id: AttributeId::Value as u32,
                        index_range: UAString::null(),
                        data_encoding: QualifiedName::null(),
                    },
                    monitoring_mode: MonitoringMode::Reporting,
                    requested_parameters: MonitoringParameters {
                        client_handle: handle,
                        sampling_interval: item.sampling_interval.as_millis() as f64,
                        filter: ExtensionObject::from_encodable(
                            ObjectId::DataChangeFilter_Encoding_DefaultBinary,
                            &DataChangeFilter {
                                trigger: DataChangeTrigger::StatusValueTimestamp,
                                deadband_type: 0,
                                deadband_value: 0.0,
                            },
                        ),
                        queue_size: item.queue_size,
                        discard_oldest: item.discard_oldest,
                    },
                }
            })
            .collect();

        let results = {
            let session = session.read();
            session
                .create_monitored_items(subscription.0, TimestampsToReturn::Both, &requests)
                .map_err(|status| {
                    OpcUaError::Subscription(SubscriptionError::create_failed(status.to_string()))
                })?
        };

        let failed = results.iter().filter(|r| !r.status_code.is_good()).count();
        if failed > 0 {
            return Err(OpcUaError::Subscription(
                SubscriptionError::MonitoredItemsRejected {
                    requested: items.len(),
                    failed,
                },
            ));
        }

        Ok(results
            .iter()
            .map(|r| MonitoredItemId(r.monitored_item_id))
            .collect())
    }
}
