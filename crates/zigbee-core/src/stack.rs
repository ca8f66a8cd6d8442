//! Stack-facing interface
//!
//! The converter layer never frames ZCL itself. It talks to endpoint and
//! device handles provided by a Zigbee stack driver through the traits in this
//! module; the driver owns transport retries, timeouts and serialization.

use crate::cluster::{AttributeRef, ClusterRef};
use crate::device::ZigbeeDevice;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// ZCL status: attribute not supported by the device
pub const STATUS_UNSUPPORTED_ATTRIBUTE: u8 = 0x86;
/// ZCL status: cluster not supported by the device
pub const STATUS_UNSUPPORTED_CLUSTER: u8 = 0xC3;

/// Errors reported by the stack driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    #[error("Unsupported attribute: {cluster}.{attribute}")]
    UnsupportedAttribute { cluster: String, attribute: String },

    #[error("Unsupported cluster: {0}")]
    UnsupportedCluster(String),

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Status {status:#04x} from {cluster}")]
    Status { cluster: String, status: u8 },
}

impl StackError {
    /// Device firmware lacks the attribute or cluster
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::UnsupportedAttribute { .. } | Self::UnsupportedCluster(_) => true,
            Self::Status { status, .. } => {
                *status == STATUS_UNSUPPORTED_ATTRIBUTE || *status == STATUS_UNSUPPORTED_CLUSTER
            }
            _ => false,
        }
    }

    /// A retry may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Per-call ZCL options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZclOptions {
    /// Manufacturer code for vendor-extended clusters/attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_code: Option<u16>,
    #[serde(default)]
    pub disable_default_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ZclOptions {
    /// Options carrying a manufacturer code
    #[must_use]
    pub fn manufacturer(code: u16) -> Self {
        Self {
            manufacturer_code: Some(code),
            ..Self::default()
        }
    }
}

/// Reportable change threshold of a reporting configuration entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportableChange {
    /// Threshold for analog data types
    Analog(i64),
    /// 48 bit threshold as `[high, low]` words
    Uint48([u32; 2]),
    /// Discrete data types report on every change
    Discrete,
}

impl From<i64> for ReportableChange {
    fn from(value: i64) -> Self {
        Self::Analog(value)
    }
}

impl From<i32> for ReportableChange {
    fn from(value: i32) -> Self {
        Self::Analog(i64::from(value))
    }
}

/// One attribute reporting configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    pub attribute: AttributeRef,
    pub minimum_report_interval: u16,
    pub maximum_report_interval: u16,
    pub reportable_change: ReportableChange,
}

/// Destination of a bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BindTarget {
    Endpoint { ieee_address: [u8; 8], endpoint: u8 },
    Group { group_id: u16 },
}

/// An endpoint handle provided by the stack
#[async_trait]
pub trait ZclEndpoint: Send + Sync {
    /// Endpoint id on the device
    fn id(&self) -> u8;

    /// IEEE address of the owning device
    fn device_ieee(&self) -> [u8; 8];

    /// Read attributes; the result maps attribute keys to values
    async fn read(
        &self,
        cluster: &ClusterRef,
        attributes: &[AttributeRef],
        options: &ZclOptions,
    ) -> Result<Map<String, Value>, StackError>;

    /// Write attributes in order
    async fn write(
        &self,
        cluster: &ClusterRef,
        attributes: &[(AttributeRef, Value)],
        options: &ZclOptions,
    ) -> Result<(), StackError>;

    /// Send a cluster command, returning the parsed response if any
    async fn command(
        &self,
        cluster: &ClusterRef,
        command: &str,
        payload: &Map<String, Value>,
        options: &ZclOptions,
    ) -> Result<Option<Map<String, Value>>, StackError>;

    /// Answer a command received from the device
    async fn command_response(
        &self,
        cluster: &ClusterRef,
        command: &str,
        payload: &Map<String, Value>,
        options: &ZclOptions,
        transaction_sequence_number: Option<u8>,
    ) -> Result<(), StackError>;

    /// Answer an attribute read issued by the device
    async fn read_response(
        &self,
        cluster: &ClusterRef,
        attributes: &Map<String, Value>,
        options: &ZclOptions,
        transaction_sequence_number: Option<u8>,
    ) -> Result<(), StackError>;

    async fn bind(&self, cluster: &ClusterRef, target: &BindTarget) -> Result<(), StackError>;

    async fn configure_reporting(
        &self,
        cluster: &ClusterRef,
        items: &[ReportingConfig],
        options: &ZclOptions,
    ) -> Result<(), StackError>;
}

/// A device handle provided by the stack
pub trait ZclDevice: Send + Sync {
    /// Interview data of the device
    fn info(&self) -> &ZigbeeDevice;

    /// Endpoint handle by id
    fn endpoint(&self, id: u8) -> Option<Arc<dyn ZclEndpoint>>;

    /// All endpoint handles, in descriptor order
    fn endpoints(&self) -> Vec<Arc<dyn ZclEndpoint>> {
        self.info()
            .endpoints
            .iter()
            .filter_map(|ep| self.endpoint(ep.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unsupported = StackError::UnsupportedAttribute {
            cluster: "genPowerCfg".to_string(),
            attribute: "batteryVoltage".to_string(),
        };
        assert!(unsupported.is_unsupported());
        assert!(!unsupported.is_transient());

        let status = StackError::Status {
            cluster: "genBasic".to_string(),
            status: STATUS_UNSUPPORTED_ATTRIBUTE,
        };
        assert!(status.is_unsupported());

        assert!(StackError::Timeout(10_000).is_transient());
        assert!(!StackError::Timeout(10_000).is_unsupported());
    }

    #[test]
    fn test_reporting_config_serializes_stack_field_names() {
        let entry = ReportingConfig {
            attribute: AttributeRef::from("measuredValue"),
            minimum_report_interval: 10,
            maximum_report_interval: 3600,
            reportable_change: ReportableChange::from(100),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "attribute": "measuredValue",
                "minimumReportInterval": 10,
                "maximumReportInterval": 3600,
                "reportableChange": 100,
            })
        );
    }
}
