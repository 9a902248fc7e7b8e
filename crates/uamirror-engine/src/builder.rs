// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Build phase: configuration snapshot to per-connection subscription plans.
//!
//! Crosses the device inventory with the point templates and groups the
//! result under the owning connection. A device referencing a missing
//! template, an unknown server, or a degenerate scaling descriptor is
//! skipped with a logged error; the build continues for everything else.
//!
//! The build is deterministic for a given snapshot: device types are
//! visited in sorted order, devices and points in document order. Running
//! it twice on the same snapshot yields the same plans, node for node.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use uamirror_config::{ClientConnection, ConfigSnapshot, SiteDevice, TemplatePoint};
use uamirror_core::scaling::AutoScaling;
use uamirror_core::types::RowSeed;
use uamirror_opcua::{MonitoredItemRequest, NodeId};

// =============================================================================
// Plan types
// =============================================================================

/// Everything one connection supervisor needs to subscribe.
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    /// The owning connection.
    pub connection: ClientConnection,
    /// Devices served by this connection, with their resolved points.
    pub devices: Vec<DevicePlan>,
}

/// One device's resolved point set.
#[derive(Debug, Clone)]
pub struct DevicePlan {
    /// The inventory entry.
    pub device: SiteDevice,
    /// Resolved point bindings.
    pub points: Vec<PointBinding>,
}

/// One template point bound to its fully qualified node id.
#[derive(Debug, Clone)]
pub struct PointBinding {
    /// Node to monitor.
    pub node_id: NodeId,
    /// Raw protocol tag name.
    pub tag_name: String,
    /// Logical measure name.
    pub measure: String,
    /// Unit of the raw and scaled values.
    pub unit: String,
    /// Scaling descriptor, immutable for the life of the subscription.
    pub scaling: AutoScaling,
}

/// Resolution of a node id back to the row it feeds.
#[derive(Debug, Clone)]
pub struct ValueBinding {
    /// Device name.
    pub device: String,
    /// Logical measure name.
    pub measure: String,
    /// Scaling descriptor.
    pub scaling: AutoScaling,
}

impl SubscriptionPlan {
    /// Row seeds for every point of every device, plus one online row
    /// per device.
    pub fn seeds(&self) -> Vec<RowSeed> {
        let mut seeds = Vec::new();
        for plan in &self.devices {
            for point in &plan.points {
                seeds.push(RowSeed {
                    device: plan.device.daq_name.clone(),
                    device_type: plan.device.device_type.clone(),
                    tag_name: point.tag_name.clone(),
                    measure: point.measure.clone(),
                    source_unit: point.unit.clone(),
                    destination_unit: point.unit.clone(),
                });
            }
            seeds.push(RowSeed::online(
                &plan.device.daq_name,
                &plan.device.device_type,
            ));
        }
        seeds
    }

    /// Monitored item requests for every bound point.
    pub fn monitored_item_requests(&self, sampling: Duration) -> Vec<MonitoredItemRequest> {
        self.devices
            .iter()
            .flat_map(|d| d.points.iter())
            .map(|p| {
                let mut request = MonitoredItemRequest::new(p.node_id.clone());
                request.sampling_interval = sampling;
                request
            })
            .collect()
    }

    /// Node id to row resolution map for the notification path.
    pub fn bindings(&self) -> HashMap<NodeId, ValueBinding> {
        let mut map = HashMap::new();
        for plan in &self.devices {
            for point in &plan.points {
                map.insert(
                    point.node_id.clone(),
                    ValueBinding {
                        device: plan.device.daq_name.clone(),
                        measure: point.measure.clone(),
                        scaling: point.scaling.clone(),
                    },
                );
            }
        }
        map
    }

    /// Names of every device in the plan.
    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.device.daq_name.clone()).collect()
    }

    /// Total number of bound points.
    pub fn point_count(&self) -> usize {
        self.devices.iter().map(|d| d.points.len()).sum()
    }
}

// =============================================================================
// Build
// =============================================================================

/// Builds one subscription plan per monitored connection.
pub fn build_plans(snapshot: &ConfigSnapshot) -> Vec<SubscriptionPlan> {
    let known_connections: Vec<&str> = snapshot
        .connections
        .iter()
        .map(|c| c.connection_name.as_str())
        .collect();

    // Sorted device types keep the plan order stable across rebuilds.
    let mut device_types: Vec<&String> = snapshot.devices.keys().collect();
    device_types.sort();

    let mut plans: Vec<SubscriptionPlan> = snapshot
        .connections
        .iter()
        .filter(|c| c.monitored)
        .map(|c| SubscriptionPlan {
            connection: c.clone(),
            devices: Vec::new(),
        })
        .collect();

    for device_type in device_types {
        for device in &snapshot.devices[device_type] {
            if !device.is_opcua() || !device.monitored {
                continue;
            }
            if !known_connections.contains(&device.server()) {
                warn!(
                    device = %device.daq_name,
                    server = %device.server(),
                    "device references unknown server, skipped"
                );
                continue;
            }
            let Some(points) = snapshot
                .templates
                .get(&device.device_type)
                .and_then(|by_name| by_name.get(&device.daq_template))
            else {
                warn!(
                    device = %device.daq_name,
                    device_type = %device.device_type,
                    template = %device.daq_template,
                    "device references missing template, skipped"
                );
                continue;
            };

            let plan = DevicePlan {
                points: bind_points(device, points),
                device: device.clone(),
            };
            if plan.points.is_empty() {
                continue;
            }
            if let Some(target) = plans
                .iter_mut()
                .find(|p| p.connection.connection_name == device.server())
            {
                target.devices.push(plan);
            }
        }
    }

    for plan in &plans {
        info!(
            connection = %plan.connection.connection_name,
            devices = plan.devices.len(),
            points = plan.point_count(),
            "subscription plan built"
        );
    }
    plans
}

fn bind_points(device: &SiteDevice, points: &[TemplatePoint]) -> Vec<PointBinding> {
    let mut bound = Vec::with_capacity(points.len());
    for point in points {
        if let Err(reason) = point.auto_scaling.validate() {
            warn!(
                device = %device.daq_name,
                measure = %point.measure,
                reason = %reason,
                "point has an unusable scaling descriptor, skipped"
            );
            continue;
        }
        bound.push(PointBinding {
            node_id: NodeId::new(device.node_id_for(&point.name)),
            tag_name: point.name.clone(),
            measure: point.measure.clone(),
            unit: point.unit.clone(),
            scaling: point.auto_scaling.clone(),
        });
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use uamirror_config::schema::{PointTemplates, SiteDevices};
    use uamirror_config::PlantConfig;
    use uamirror_core::types::ONLINE_MEASURE;

    fn snapshot() -> ConfigSnapshot {
        let connections: Vec<ClientConnection> = serde_json::from_str(
            r#"[
                {"connectionName": "plant-a", "url": "opc.tcp://10.0.4.20:4840"},
                {"connectionName": "plant-b", "url": "opc.tcp://10.0.4.21:4840", "monitored": false}
            ]"#,
        )
        .unwrap();

        let devices: SiteDevices = serde_json::from_str(
            r#"{
                "inverter": [
                    {
                        "daq_name": "inv1",
                        "daq_template": "basic",
                        "device_type": "inverter",
                        "network": {"params": {
                            "protocol": "opcua", "prefix": "INV1_",
                            "server": "plant-a", "point_node": "ns=2;s=Devices"
                        }}
                    },
                    {
                        "daq_name": "inv2",
                        "daq_template": "missing",
                        "device_type": "inverter",
                        "network": {"params": {
                            "protocol": "opcua", "prefix": "INV2_",
                            "server": "plant-a", "point_node": "ns=2;s=Devices"
                        }}
                    }
                ],
                "meter": [
                    {
                        "daq_name": "met1",
                        "daq_template": "basic",
                        "device_type": "meter",
                        "network": {"params": {
                            "protocol": "modbus", "prefix": "",
                            "server": "plant-a", "point_node": ""
                        }}
                    }
                ]
            }"#,
        )
        .unwrap();

        let templates: PointTemplates = serde_json::from_str(
            r#"{
                "inverter": {
                    "basic": [
                        {"unit": "W", "name": "W", "measure": "power",
                         "autoScaling": {"scale_mode": "slope_intercept", "slope": 0.1}},
                        {"unit": "V", "name": "V", "measure": "voltage",
                         "autoScaling": {"scale_mode": "point_slope",
                                         "value_min": 0, "value_max": 0,
                                         "target_min": 0, "target_max": 1}}
                    ]
                }
            }"#,
        )
        .unwrap();

        ConfigSnapshot {
            connections,
            devices,
            templates,
            plant: PlantConfig::default(),
        }
    }

    #[test]
    fn build_skips_broken_items_and_keeps_the_rest() {
        let plans = build_plans(&snapshot());

        // plant-b is unmonitored, so only plant-a gets a plan.
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.connection.connection_name, "plant-a");

        // inv2 has a missing template, met1 is not opcua, and the
        // degenerate point_slope voltage point is skipped; only
        // inv1/power survives.
        assert_eq!(plan.device_names(), vec!["inv1"]);
        assert_eq!(plan.point_count(), 1);
        assert_eq!(
            plan.devices[0].points[0].node_id.as_str(),
            "ns=2;s=Devices/INV1_W"
        );
    }

    #[test]
    fn every_device_gets_measure_and_online_seeds() {
        let plans = build_plans(&snapshot());
        let seeds = plans[0].seeds();

        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().any(|s| s.measure == "power"));
        assert!(seeds
            .iter()
            .any(|s| s.device == "inv1" && s.measure == ONLINE_MEASURE));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let snapshot = snapshot();
        let first = build_plans(&snapshot);
        let second = build_plans(&snapshot);

        let nodes = |plans: &[SubscriptionPlan]| -> Vec<String> {
            plans
                .iter()
                .flat_map(|p| p.monitored_item_requests(Duration::from_secs(5)))
                .map(|r| r.node_id.as_str().to_string())
                .collect()
        };
        assert_eq!(nodes(&first), nodes(&second));
    }

    #[test]
    fn bindings_resolve_node_ids_to_rows() {
        let plans = build_plans(&snapshot());
        let bindings = plans[0].bindings();

        let binding = &bindings[&NodeId::new("ns=2;s=Devices/INV1_W")];
        assert_eq!(binding.device, "inv1");
        assert_eq!(binding.measure, "power");
        assert_eq!(binding.scaling.apply(1060.0), 106.0);
    }
}
