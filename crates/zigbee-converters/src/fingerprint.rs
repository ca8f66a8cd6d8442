//! Device fingerprints and white labels
//!
//! A fingerprint matches a device on interview data when the zigbee model
//! alone is ambiguous (re-branded modules, shared model ids). Every field is
//! optional; unset fields match anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use zigbee_core::{DeviceType, Endpoint, ZigbeeDevice};

/// Endpoint descriptor constraint of a fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u16>,
    /// Compared as a set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_clusters: Option<Vec<u16>>,
    /// Compared as a set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_clusters: Option<Vec<u16>>,
}

impl FingerprintEndpoint {
    fn matches(&self, endpoint: &Endpoint) -> bool {
        fn same_set(expected: Option<&Vec<u16>>, actual: &[u16]) -> bool {
            expected.map_or(true, |expected| {
                expected.iter().collect::<BTreeSet<_>>() == actual.iter().collect::<BTreeSet<_>>()
            })
        }
        self.id.map_or(true, |id| id == endpoint.id)
            && self.profile_id.map_or(true, |p| p == endpoint.profile_id)
            && self.device_id.map_or(true, |d| d == endpoint.device_id)
            && same_set(self.input_clusters.as_ref(), &endpoint.in_clusters)
            && same_set(self.output_clusters.as_ref(), &endpoint.out_clusters)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zcl_version: Option<u8>,
    /// Hex prefix of the IEEE address, e.g. `0x00124b`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ieee_prefix: Option<String>,
    /// All device endpoints; the device must have exactly this many
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<FingerprintEndpoint>>,
    /// Higher wins when several fingerprints match
    #[serde(default)]
    pub priority: i32,
}

impl Fingerprint {
    /// Fingerprint on the Basic cluster model id and manufacturer name
    #[must_use]
    pub fn model(model_id: &str, manufacturer_name: &str) -> Self {
        Self {
            model_id: Some(model_id.to_string()),
            manufacturer_name: Some(manufacturer_name.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn matches(&self, device: &ZigbeeDevice) -> bool {
        fn field<T: PartialEq>(expected: Option<&T>, actual: Option<&T>) -> bool {
            expected.map_or(true, |e| actual == Some(e))
        }

        let scalar = field(self.application_version.as_ref(), device.application_version.as_ref())
            && field(self.manufacturer_id.as_ref(), device.manufacturer_id.as_ref())
            && self.device_type.map_or(true, |t| t == device.device_type)
            && field(self.date_code.as_ref(), device.date_code.as_ref())
            && field(self.hardware_version.as_ref(), device.hardware_version.as_ref())
            && field(self.manufacturer_name.as_ref(), device.manufacturer_name.as_ref())
            && field(self.model_id.as_ref(), device.model_id.as_ref())
            && field(self.power_source.as_ref(), device.power_source.as_ref())
            && field(self.software_build_id.as_ref(), device.software_build_id.as_ref())
            && field(self.stack_version.as_ref(), device.stack_version.as_ref())
            && field(self.zcl_version.as_ref(), device.zcl_version.as_ref());
        if !scalar {
            return false;
        }

        if let Some(prefix) = &self.ieee_prefix {
            if !device
                .ieee_address_hex()
                .starts_with(&prefix.to_lowercase())
            {
                return false;
            }
        }

        match &self.endpoints {
            None => true,
            Some(expected) => {
                expected.len() == device.endpoints.len()
                    && expected
                        .iter()
                        .all(|fp| device.endpoints.iter().any(|ep| fp.matches(ep)))
            }
        }
    }
}

/// Re-branded variant of a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteLabel {
    pub vendor: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When set, devices matching these report as this white label
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<Fingerprint>,
}

impl WhiteLabel {
    #[must_use]
    pub fn new(vendor: &str, model: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            description: None,
            fingerprint: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint.push(fingerprint);
        self
    }
}
