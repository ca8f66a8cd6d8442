//! Zigbee abstraction layer
//!
//! This crate describes the Zigbee stack as seen by device converters:
//! cluster and attribute addressing, interviewed devices, parsed inbound
//! messages, and the endpoint/device handles a stack driver provides.

pub mod cluster;
pub mod device;
pub mod message;
pub mod recording;
pub mod stack;

pub use cluster::{AttributeRef, ClusterRef, DataType};
pub use device::{format_ieee_address, parse_ieee_address, DeviceType, Endpoint, ZigbeeDevice};
pub use message::{MessageMeta, MessageType, ZclMessage};
pub use stack::{
    BindTarget, ReportableChange, ReportingConfig, StackError, ZclDevice, ZclEndpoint, ZclOptions,
};
