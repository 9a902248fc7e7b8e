// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `validate` subcommand: load and cross-check the four gateway
//! documents without touching a server or database.

use serde_json::json;
use uamirror_config::{ConfigLoader, ConfigSnapshot};

use crate::cli::{Cli, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Load the snapshot, report problems, and exit nonzero on errors
/// (or on warnings under `--strict`).
pub async fn execute(cli: &Cli, args: &ValidateArgs) -> BinResult<()> {
    if !cli.config.is_dir() {
        return Err(BinError::init(format!(
            "configuration directory '{}' does not exist",
            cli.config.display()
        )));
    }

    let loader = ConfigLoader::new(&cli.config);
    let snapshot = loader.load_snapshot().await?;

    for connection in &snapshot.connections {
        connection.validate()?;
    }
    let warnings = collect_warnings(&snapshot);

    report(cli, args, &snapshot, &warnings);

    if args.strict && !warnings.is_empty() {
        return Err(BinError::runtime(format!(
            "{} warning(s) in strict mode",
            warnings.len()
        )));
    }
    Ok(())
}

/// Cross-document checks that are legal but almost certainly wrong.
fn collect_warnings(snapshot: &ConfigSnapshot) -> Vec<String> {
    let mut warnings = Vec::new();

    for connection in &snapshot.connections {
        if !connection.monitored {
            warnings.push(format!(
                "connection '{}' is not monitored; its devices will never seed",
                connection.connection_name
            ));
        }
        if connection.has_credentials() && std::env::var("OPCUA_PW_ENCRYPTION_KEY").is_err() {
            warnings.push(format!(
                "connection '{}' has credentials but OPCUA_PW_ENCRYPTION_KEY is not set",
                connection.connection_name
            ));
        }
    }

    for (device_type, devices) in &snapshot.devices {
        for device in devices {
            if !device.is_opcua() {
                continue;
            }
            if snapshot.connection(device.server()).is_none() {
                warnings.push(format!(
                    "device '{}' references unknown connection '{}'",
                    device.daq_name,
                    device.server()
                ));
            }
            let template_known = snapshot
                .templates
                .get(device_type)
                .map(|by_name| by_name.contains_key(&device.daq_template))
                .unwrap_or(false);
            if !template_known {
                warnings.push(format!(
                    "device '{}' references missing template '{}/{}'",
                    device.daq_name, device_type, device.daq_template
                ));
            }
        }
    }

    warnings
}

fn report(cli: &Cli, args: &ValidateArgs, snapshot: &ConfigSnapshot, warnings: &[String]) {
    let device_count: usize = snapshot.devices.values().map(Vec::len).sum();

    if args.json {
        let doc = json!({
            "config_dir": cli.config.display().to_string(),
            "connections": snapshot.connections.len(),
            "device_types": snapshot.devices.len(),
            "devices": device_count,
            "warnings": warnings,
            "valid": true,
        });
        println!("{doc:#}");
        return;
    }

    println!("configuration: {}", cli.config.display());
    println!("  connections:  {}", snapshot.connections.len());
    println!("  device types: {}", snapshot.devices.len());
    println!("  devices:      {device_count}");
    if warnings.is_empty() {
        println!("  warnings:     none");
    } else {
        println!("  warnings:");
        for warning in warnings {
            println!("    - {warning}");
        }
    }
    println!("OK");
}

#[cfg(test)]
mod tests {
    use super::*;
    use uamirror_config::schema::{PointTemplates, SiteDevices};
    use uamirror_config::PlantConfig;

    fn snapshot() -> ConfigSnapshot {
        let connections = serde_json::from_str(
            r#"[{"connectionName": "plant-a", "url": "opc.tcp://10.0.4.20:4840"}]"#,
        )
        .unwrap();
        let devices: SiteDevices = serde_json::from_str(
            r#"{
                "inverter": [{
                    "daq_name": "inv1", "daq_template": "basic",
                    "device_type": "inverter",
                    "network": {"params": {
                        "protocol": "opcua", "server": "plant-a",
                        "point_node": "ns=2;s=Devices", "prefix": "INV1_"
                    }}
                }]
            }"#,
        )
        .unwrap();
        let templates: PointTemplates = serde_json::from_str(
            r#"{"inverter": {"basic": [
                {"unit": "W", "name": "W", "measure": "power",
                 "autoScaling": {"scale_mode": "slope_intercept"}}
            ]}}"#,
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
    fn consistent_snapshot_has_no_warnings() {
        assert!(collect_warnings(&snapshot()).is_empty());
    }

    #[test]
    fn unknown_server_and_template_are_flagged() {
        let mut snapshot = snapshot();
        let device = &mut snapshot.devices.get_mut("inverter").unwrap()[0];
        device.network.params.server = "nowhere".into();
        device.daq_template = "missing".into();

        let warnings = collect_warnings(&snapshot);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("unknown connection 'nowhere'"));
        assert!(warnings[1].contains("missing template 'inverter/missing'"));
    }
}
