//! Zigbee device representation

use serde::{Deserialize, Serialize};

/// Zigbee device types (network role)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
}

/// A Zigbee device as interviewed by the stack
///
/// Holds the identification data reported by the Basic cluster and the
/// node/simple descriptors; definitions are matched against these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZigbeeDevice {
    /// IEEE address (EUI-64), least significant byte first
    pub ieee_address: [u8; 8],
    /// Network short address
    pub nwk_address: u16,
    /// Device type (network role)
    pub device_type: DeviceType,
    /// Manufacturer code from the node descriptor
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
    /// Manufacturer name (from Basic cluster)
    #[serde(default)]
    pub manufacturer_name: Option<String>,
    /// Model identifier (from Basic cluster)
    #[serde(default)]
    pub model_id: Option<String>,
    /// Power source as reported by the Basic cluster
    #[serde(default)]
    pub power_source: Option<String>,
    #[serde(default)]
    pub application_version: Option<u8>,
    #[serde(default)]
    pub stack_version: Option<u8>,
    #[serde(default)]
    pub hardware_version: Option<u8>,
    #[serde(default)]
    pub zcl_version: Option<u8>,
    #[serde(default)]
    pub date_code: Option<String>,
    #[serde(default)]
    pub software_build_id: Option<String>,
    /// User-assigned friendly name
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Device endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ZigbeeDevice {
    /// Create a new device with just address info
    #[must_use]
    pub fn new(ieee_address: [u8; 8], nwk_address: u16) -> Self {
        Self {
            ieee_address,
            nwk_address,
            device_type: DeviceType::EndDevice,
            manufacturer_id: None,
            manufacturer_name: None,
            model_id: None,
            power_source: None,
            application_version: None,
            stack_version: None,
            hardware_version: None,
            zcl_version: None,
            date_code: None,
            software_build_id: None,
            friendly_name: None,
            endpoints: Vec::new(),
        }
    }

    /// Set the Basic cluster model identifier
    #[must_use]
    pub fn with_model(mut self, model_id: &str) -> Self {
        self.model_id = Some(model_id.to_string());
        self
    }

    /// Set the Basic cluster manufacturer name
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer_name: &str) -> Self {
        self.manufacturer_name = Some(manufacturer_name.to_string());
        self
    }

    /// Add an endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Get IEEE address as colon separated hex string
    #[must_use]
    pub fn ieee_address_string(&self) -> String {
        format_ieee_address(&self.ieee_address)
    }

    /// Get IEEE address in the `0x00124b...` form used by fingerprints
    #[must_use]
    pub fn ieee_address_hex(&self) -> String {
        let digits: String = self
            .ieee_address
            .iter()
            .rev()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("0x{digits}")
    }

    /// Get a display name (friendly name, model, or IEEE address)
    #[must_use]
    pub fn display_name(&self) -> String {
        self.friendly_name
            .clone()
            .or_else(|| self.model_id.clone())
            .unwrap_or_else(|| self.ieee_address_string())
    }

    /// Find an endpoint by id
    #[must_use]
    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.id == id)
    }

    /// Whether the device runs on battery
    #[must_use]
    pub fn is_battery_powered(&self) -> bool {
        self.power_source
            .as_deref()
            .is_some_and(|source| source.eq_ignore_ascii_case("battery"))
    }
}

/// A device endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint ID (1-240)
    pub id: u8,
    /// Profile ID (e.g., 0x0104 for Home Automation)
    pub profile_id: u16,
    /// Device ID within the profile
    pub device_id: u16,
    /// Input (server) clusters
    pub in_clusters: Vec<u16>,
    /// Output (client) clusters
    pub out_clusters: Vec<u16>,
}

impl Endpoint {
    /// Create a Home Automation endpoint
    #[must_use]
    pub fn new(id: u8, in_clusters: &[u16], out_clusters: &[u16]) -> Self {
        Self {
            id,
            profile_id: 0x0104,
            device_id: 0,
            in_clusters: in_clusters.to_vec(),
            out_clusters: out_clusters.to_vec(),
        }
    }

    /// Check if endpoint has a specific cluster
    #[must_use]
    pub fn has_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id) || self.out_clusters.contains(&cluster_id)
    }

    /// Check if endpoint serves a cluster (input side)
    #[must_use]
    pub fn has_input_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id)
    }

    /// Check if endpoint sends commands on a cluster (output side)
    #[must_use]
    pub fn has_output_cluster(&self, cluster_id: u16) -> bool {
        self.out_clusters.contains(&cluster_id)
    }
}

/// Format an IEEE address as colon separated hex, most significant byte first
#[must_use]
pub fn format_ieee_address(ieee_address: &[u8; 8]) -> String {
    ieee_address
        .iter()
        .rev()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse an IEEE address string like `00:11:22:33:44:55:66:77` or
/// `0x0011223344556677` into the internal little-endian representation
#[must_use]
pub fn parse_ieee_address(s: &str) -> Option<[u8; 8]> {
    let hex: String = s
        .trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':')
        .collect();
    if hex.len() != 16 {
        return None;
    }

    let mut arr = [0u8; 8];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).ok()?;
        // Reverse to match internal representation
        arr[7 - i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(arr)
}
