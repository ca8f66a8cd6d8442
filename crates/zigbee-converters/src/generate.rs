//! Definitions for devices missing from the catalog
//!
//! The device's input clusters are mapped onto the standard extends. The
//! declaration can be saved to the catalog file and edited from there.

use crate::definition::Definition;
use crate::error::AssemblyError;
use crate::extend::{
    BatteryArgs, DeviceEndpointsArgs, ElectricityMeterArgs, MeasurementArgs, MeterCluster, OnOffArgs,
};
use crate::fingerprint::Fingerprint;
use crate::model::{DeclaredDefinition, ExtendSpec};
use std::collections::BTreeSet;
use zigbee_core::cluster::id;
use zigbee_core::ZigbeeDevice;

/// Endpoints of `device` serving `cluster` as a server
fn serving(device: &ZigbeeDevice, cluster: u16) -> Vec<u8> {
    device
        .endpoints
        .iter()
        .filter(|ep| ep.has_input_cluster(cluster))
        .map(|ep| ep.id)
        .collect()
}

/// Declarative definition derived from the device's clusters
#[must_use]
pub fn generate_declaration(device: &ZigbeeDevice) -> DeclaredDefinition {
    let model = device
        .model_id
        .clone()
        .unwrap_or_else(|| device.ieee_address_hex());
    let vendor = device
        .manufacturer_name
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());
    let mut declared = DeclaredDefinition::new(&model, &vendor, "Automatically generated definition");
    match &device.model_id {
        Some(model_id) => declared.zigbee_model.push(model_id.clone()),
        None => declared.fingerprint.push(Fingerprint {
            ieee_prefix: Some(device.ieee_address_hex()),
            ..Fingerprint::default()
        }),
    }

    let mut named: BTreeSet<u8> = BTreeSet::new();
    let mut extends = Vec::new();
    let mut names_for = |endpoints: &[u8]| -> Option<Vec<String>> {
        if endpoints.len() < 2 {
            return None;
        }
        named.extend(endpoints.iter().copied());
        Some(endpoints.iter().map(u8::to_string).collect())
    };

    let measurements: [(u16, fn(MeasurementArgs) -> ExtendSpec); 5] = [
        (id::TEMPERATURE_MEASUREMENT, ExtendSpec::Temperature),
        (id::HUMIDITY_MEASUREMENT, ExtendSpec::Humidity),
        (id::PRESSURE_MEASUREMENT, ExtendSpec::Pressure),
        (id::ILLUMINANCE_MEASUREMENT, ExtendSpec::Illuminance),
        (id::OCCUPANCY_SENSING, ExtendSpec::Occupancy),
    ];
    for (cluster, spec) in measurements {
        let endpoints = serving(device, cluster);
        if endpoints.is_empty() {
            continue;
        }
        extends.push(spec(MeasurementArgs {
            endpoint_names: names_for(&endpoints),
            ..MeasurementArgs::default()
        }));
    }

    let switches = serving(device, id::ON_OFF);
    if !switches.is_empty() {
        extends.push(ExtendSpec::OnOff(OnOffArgs {
            endpoint_names: names_for(&switches),
            ..OnOffArgs::default()
        }));
    }

    let metering = serving(device, id::METERING);
    let electrical = serving(device, id::ELECTRICAL_MEASUREMENT);
    let cluster = match (metering.is_empty(), electrical.is_empty()) {
        (false, false) => Some(MeterCluster::Both),
        (true, false) => Some(MeterCluster::Electrical),
        (false, true) => Some(MeterCluster::Metering),
        (true, true) => None,
    };
    if let Some(cluster) = cluster {
        let endpoints: &[u8] = if electrical.is_empty() { &metering } else { &electrical };
        extends.push(ExtendSpec::ElectricityMeter(ElectricityMeterArgs {
            cluster,
            endpoint_names: names_for(endpoints),
            ..ElectricityMeterArgs::default()
        }));
    }

    if !serving(device, id::POWER_CONFIG).is_empty() {
        extends.push(ExtendSpec::Battery(BatteryArgs::default()));
    }

    if !named.is_empty() {
        let endpoints: Vec<(String, u8)> = named.iter().map(|ep| (ep.to_string(), *ep)).collect();
        let pairs: Vec<(&str, u8)> = endpoints.iter().map(|(n, ep)| (n.as_str(), *ep)).collect();
        declared
            .extend
            .push(ExtendSpec::DeviceEndpoints(DeviceEndpointsArgs::new(&pairs)));
    }
    declared.extend.extend(extends);
    declared
}

/// Assembled definition for `device`, flagged as generated
pub fn generate_definition(device: &ZigbeeDevice) -> Result<Definition, AssemblyError> {
    let declared = generate_declaration(device);
    let definition = declared.builder().generated(true).build()?;
    tracing::info!(
        "Generated definition for {} with extends {:?}",
        device.display_name(),
        definition.extends
    );
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zigbee_core::Endpoint;

    #[test]
    fn test_generate_sensor() {
        let device = ZigbeeDevice::new([0x41; 8], 0x41)
            .with_model("lumi.weather")
            .with_manufacturer("LUMI")
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x0001, 0x0402, 0x0403, 0x0405], &[]));
        let declared = generate_declaration(&device);
        assert_eq!(declared.zigbee_model, vec!["lumi.weather".to_string()]);
        assert_eq!(
            serde_json::to_value(&declared.extend).unwrap(),
            json!([
                {"type": "temperature", "configure_reporting": true},
                {"type": "humidity", "configure_reporting": true},
                {"type": "pressure", "configure_reporting": true},
                {"type": "battery", "percentage": true, "voltage": false, "alarm": false,
                 "dont_divide_percentage": false, "configure_reporting": true}
            ])
        );

        let definition = generate_definition(&device).unwrap();
        assert!(definition.generated);
        assert!(definition.exposes.iter().any(|e| e.has_name("pressure")));
    }

    #[test]
    fn test_generate_multi_gang_switch() {
        let device = ZigbeeDevice::new([0x42; 8], 0x42)
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x0006], &[]))
            .with_endpoint(Endpoint::new(2, &[0x0006], &[]));
        let declared = generate_declaration(&device);
        assert!(declared.zigbee_model.is_empty());
        assert_eq!(declared.fingerprint.len(), 1);
        assert!(matches!(declared.extend[0], ExtendSpec::DeviceEndpoints(_)));

        let definition = generate_definition(&device).unwrap();
        assert!(definition.fingerprint[0].matches(&device));
        assert!(definition.find_to_zigbee("state", Some("2")).is_some());
        assert!(definition.meta.multi_endpoint());
    }

    #[test]
    fn test_generate_electricity_meter() {
        let device = ZigbeeDevice::new([0x43; 8], 0x43)
            .with_model("PLUG-E")
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x0006, 0x0b04], &[]));
        let declared = generate_declaration(&device);
        assert_eq!(
            serde_json::to_value(&declared.extend[1]).unwrap(),
            json!({"type": "electricity_meter", "cluster": "electrical", "power": true,
                   "voltage": true, "current": true, "energy": true, "configure_reporting": true})
        );

        let definition = generate_definition(&device).unwrap();
        assert!(definition.exposes.iter().any(|e| e.has_name("power")));
        assert!(!definition.exposes.iter().any(|e| e.has_name("energy")));
        assert!(definition.find_to_zigbee("voltage", None).is_some());
    }
}
