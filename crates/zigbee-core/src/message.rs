//! Parsed inbound ZCL messages as delivered by the stack

use crate::cluster::ClusterRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum MessageType {
    /// Unsolicited attribute report
    AttributeReport,
    /// Reply to a read request
    ReadResponse,
    /// Read request issued by the device
    Read,
    /// Cluster specific command, by stack command name (`on`, `toggle`, ...)
    Command(String),
    /// Unparsed frame
    Raw,
}

impl MessageType {
    /// Named command helper
    #[must_use]
    pub fn command(name: &str) -> Self {
        Self::Command(name.to_string())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeReport => f.write_str("attributeReport"),
            Self::ReadResponse => f.write_str("readResponse"),
            Self::Read => f.write_str("read"),
            Self::Command(name) => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => write!(f, "command{}{}", first.to_uppercase(), chars.as_str()),
                    None => f.write_str("command"),
                }
            }
            Self::Raw => f.write_str("raw"),
        }
    }
}

/// ZCL header fields carried alongside the payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default)]
    pub transaction_sequence_number: Option<u8>,
    #[serde(default)]
    pub manufacturer_code: Option<u16>,
}

/// An inbound message from a device endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZclMessage {
    pub cluster: ClusterRef,
    pub message_type: MessageType,
    /// Attribute values or command payload, keyed by name or numeric id
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub raw: Vec<u8>,
    /// Source endpoint id
    pub endpoint: u8,
    pub device_ieee: [u8; 8],
    #[serde(default)]
    pub meta: MessageMeta,
    #[serde(default)]
    pub group_id: Option<u16>,
    #[serde(default)]
    pub linkquality: Option<u8>,
}

impl ZclMessage {
    /// Create a message with an empty payload
    #[must_use]
    pub fn new(cluster: impl Into<ClusterRef>, message_type: MessageType, endpoint: u8) -> Self {
        Self {
            cluster: cluster.into(),
            message_type,
            data: Map::new(),
            raw: Vec::new(),
            endpoint,
            device_ieee: [0; 8],
            meta: MessageMeta::default(),
            group_id: None,
            linkquality: None,
        }
    }

    /// Attribute report carrying `data`
    #[must_use]
    pub fn attribute_report(cluster: impl Into<ClusterRef>, endpoint: u8, data: Value) -> Self {
        Self::new(cluster, MessageType::AttributeReport, endpoint).with_data(data)
    }

    /// Named command carrying `data`
    #[must_use]
    pub fn command(cluster: impl Into<ClusterRef>, name: &str, endpoint: u8, data: Value) -> Self {
        Self::new(cluster, MessageType::command(name), endpoint).with_data(data)
    }

    /// Replace the payload; non-object values leave it empty
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    #[must_use]
    pub fn from_device(mut self, ieee_address: [u8; 8]) -> Self {
        self.device_ieee = ieee_address;
        self
    }

    #[must_use]
    pub fn with_transaction_sequence_number(mut self, tsn: u8) -> Self {
        self.meta.transaction_sequence_number = Some(tsn);
        self
    }

    #[must_use]
    pub fn with_linkquality(mut self, linkquality: u8) -> Self {
        self.linkquality = Some(linkquality);
        self
    }

    #[must_use]
    pub fn with_group(mut self, group_id: u16) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Attribute value by key
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Attribute value as a number
    #[must_use]
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::AttributeReport.to_string(), "attributeReport");
        assert_eq!(MessageType::command("on").to_string(), "commandOn");
        assert_eq!(
            MessageType::command("offWithEffect").to_string(),
            "commandOffWithEffect"
        );
    }

    #[test]
    fn test_attribute_accessors() {
        let msg = ZclMessage::attribute_report(
            "msTemperatureMeasurement",
            1,
            json!({"measuredValue": 2150, "tolerance": null}),
        )
        .with_transaction_sequence_number(12);

        assert_eq!(msg.attribute_f64("measuredValue"), Some(2150.0));
        assert_eq!(msg.attribute_f64("tolerance"), None);
        assert_eq!(msg.attribute("missing"), None);
        assert_eq!(msg.meta.transaction_sequence_number, Some(12));
    }
}
