//! ZCL (Zigbee Cluster Library) definitions
//!
//! Clusters and attributes are addressed either by their numeric id or by the
//! name the stack uses for them (`genOnOff`, `msTemperatureMeasurement`, ...).
//! [`ClusterRef`] and [`AttributeRef`] normalise both spellings so converter
//! tables can be keyed consistently.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Common ZCL cluster IDs
pub mod id {
    // General Clusters
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const DEVICE_TEMP: u16 = 0x0002;
    pub const IDENTIFY: u16 = 0x0003;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const ON_OFF_SWITCH_CONFIG: u16 = 0x0007;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const ALARMS: u16 = 0x0009;
    pub const TIME: u16 = 0x000A;
    pub const ANALOG_INPUT: u16 = 0x000C;
    pub const BINARY_INPUT: u16 = 0x000F;
    pub const MULTISTATE_INPUT: u16 = 0x0012;
    pub const OTA: u16 = 0x0019;
    pub const POLL_CONTROL: u16 = 0x0020;

    // Lighting Clusters
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const BALLAST_CONFIG: u16 = 0x0301;

    // Measurement Clusters
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const ILLUMINANCE_LEVEL_SENSING: u16 = 0x0401;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
    pub const FLOW_MEASUREMENT: u16 = 0x0404;
    pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;

    // Security Clusters
    pub const IAS_ZONE: u16 = 0x0500;
    pub const IAS_ACE: u16 = 0x0501;
    pub const IAS_WD: u16 = 0x0502;

    // HVAC Clusters
    pub const THERMOSTAT: u16 = 0x0201;
    pub const FAN_CONTROL: u16 = 0x0202;
    pub const HVAC_USER_INTERFACE_CFG: u16 = 0x0204;

    // Closures Clusters
    pub const DOOR_LOCK: u16 = 0x0101;
    pub const WINDOW_COVERING: u16 = 0x0102;

    // Smart Energy
    pub const METERING: u16 = 0x0702;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
}

/// Stack names for the known clusters
const CLUSTER_NAMES: &[(u16, &str)] = &[
    (id::BASIC, "genBasic"),
    (id::POWER_CONFIG, "genPowerCfg"),
    (id::DEVICE_TEMP, "genDeviceTempCfg"),
    (id::IDENTIFY, "genIdentify"),
    (id::GROUPS, "genGroups"),
    (id::SCENES, "genScenes"),
    (id::ON_OFF, "genOnOff"),
    (id::ON_OFF_SWITCH_CONFIG, "genOnOffSwitchCfg"),
    (id::LEVEL_CONTROL, "genLevelCtrl"),
    (id::ALARMS, "genAlarms"),
    (id::TIME, "genTime"),
    (id::ANALOG_INPUT, "genAnalogInput"),
    (id::BINARY_INPUT, "genBinaryInput"),
    (id::MULTISTATE_INPUT, "genMultistateInput"),
    (id::OTA, "genOta"),
    (id::POLL_CONTROL, "genPollCtrl"),
    (id::COLOR_CONTROL, "lightingColorCtrl"),
    (id::BALLAST_CONFIG, "lightingBallastCfg"),
    (id::ILLUMINANCE_MEASUREMENT, "msIlluminanceMeasurement"),
    (id::ILLUMINANCE_LEVEL_SENSING, "msIlluminanceLevelSensing"),
    (id::TEMPERATURE_MEASUREMENT, "msTemperatureMeasurement"),
    (id::PRESSURE_MEASUREMENT, "msPressureMeasurement"),
    (id::FLOW_MEASUREMENT, "msFlowMeasurement"),
    (id::HUMIDITY_MEASUREMENT, "msRelativeHumidity"),
    (id::OCCUPANCY_SENSING, "msOccupancySensing"),
    (id::IAS_ZONE, "ssIasZone"),
    (id::IAS_ACE, "ssIasAce"),
    (id::IAS_WD, "ssIasWd"),
    (id::THERMOSTAT, "hvacThermostat"),
    (id::FAN_CONTROL, "hvacFanCtrl"),
    (id::HVAC_USER_INTERFACE_CFG, "hvacUserInterfaceCfg"),
    (id::DOOR_LOCK, "closuresDoorLock"),
    (id::WINDOW_COVERING, "closuresWindowCovering"),
    (id::METERING, "seMetering"),
    (id::ELECTRICAL_MEASUREMENT, "haElectricalMeasurement"),
];

/// Look up the stack name of a cluster id
#[must_use]
pub fn name_of(cluster_id: u16) -> Option<&'static str> {
    CLUSTER_NAMES
        .iter()
        .find(|(id, _)| *id == cluster_id)
        .map(|(_, name)| *name)
}

/// Look up the cluster id for a stack name
#[must_use]
pub fn id_of(name: &str) -> Option<u16> {
    CLUSTER_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(id, _)| *id)
}

/// A cluster addressed by id or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterRef {
    Id(u16),
    Name(String),
}

impl ClusterRef {
    /// Numeric cluster id, resolving known names
    #[must_use]
    pub fn id(&self) -> Option<u16> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(name) => name.parse().ok().or_else(|| id_of(name)),
        }
    }

    /// Canonical lookup key: the stack name when known, otherwise the raw spelling.
    ///
    /// `ClusterRef::Id(6)` and `ClusterRef::Name("genOnOff")` share the key
    /// `genOnOff`; vendor clusters without a registered name keep their id.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Id(id) => name_of(*id).map_or_else(|| id.to_string(), str::to_string),
            Self::Name(name) => match name.parse::<u16>() {
                Ok(id) => Self::Id(id).key(),
                Err(_) => name.clone(),
            },
        }
    }

    /// Whether two references address the same cluster
    #[must_use]
    pub fn matches(&self, other: &ClusterRef) -> bool {
        self.key() == other.key()
    }
}

impl From<u16> for ClusterRef {
    fn from(id: u16) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ClusterRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ClusterRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// An attribute addressed by stack name or by raw id with an explicit data type.
///
/// Manufacturer-specific attributes usually have no name in the stack's
/// cluster tables, so they are written as `{id, type}` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeRef {
    Name(String),
    Typed {
        id: u16,
        #[serde(rename = "type")]
        data_type: DataType,
    },
}

impl AttributeRef {
    /// Create a typed reference for a raw attribute id
    #[must_use]
    pub fn typed(id: u16, data_type: DataType) -> Self {
        Self::Typed { id, data_type }
    }

    /// Key under which the attribute shows up in message data
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Typed { id, .. } => id.to_string(),
        }
    }
}

impl From<&str> for AttributeRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for AttributeRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// ZCL data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum DataType {
    NoData = 0x00,
    Data8 = 0x08,
    Data16 = 0x09,
    Data24 = 0x0A,
    Data32 = 0x0B,
    Boolean = 0x10,
    Bitmap8 = 0x18,
    Bitmap16 = 0x19,
    Bitmap24 = 0x1A,
    Bitmap32 = 0x1B,
    Uint8 = 0x20,
    Uint16 = 0x21,
    Uint24 = 0x22,
    Uint32 = 0x23,
    Uint48 = 0x25,
    Int8 = 0x28,
    Int16 = 0x29,
    Int24 = 0x2A,
    Int32 = 0x2B,
    Enum8 = 0x30,
    Enum16 = 0x31,
    Float16 = 0x38,
    Float32 = 0x39,
    Float64 = 0x3A,
    OctetString = 0x41,
    String = 0x42,
    Array = 0x48,
    Struct = 0x4C,
    UtcTime = 0xE2,
    Ieee = 0xF0,
}

impl DataType {
    const ALL: [DataType; 30] = [
        Self::NoData,
        Self::Data8,
        Self::Data16,
        Self::Data24,
        Self::Data32,
        Self::Boolean,
        Self::Bitmap8,
        Self::Bitmap16,
        Self::Bitmap24,
        Self::Bitmap32,
        Self::Uint8,
        Self::Uint16,
        Self::Uint24,
        Self::Uint32,
        Self::Uint48,
        Self::Int8,
        Self::Int16,
        Self::Int24,
        Self::Int32,
        Self::Enum8,
        Self::Enum16,
        Self::Float16,
        Self::Float32,
        Self::Float64,
        Self::OctetString,
        Self::String,
        Self::Array,
        Self::Struct,
        Self::UtcTime,
        Self::Ieee,
    ];

    /// Whether reporting on this type uses a reportable-change threshold
    #[must_use]
    pub fn is_analog(self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Uint16
                | Self::Uint24
                | Self::Uint32
                | Self::Uint48
                | Self::Int8
                | Self::Int16
                | Self::Int24
                | Self::Int32
                | Self::Float16
                | Self::Float32
                | Self::Float64
                | Self::UtcTime
        )
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for DataType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as u8 == value)
            .ok_or_else(|| format!("Unknown ZCL data type: {value:#04x}"))
    }
}
