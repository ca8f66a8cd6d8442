//! Exposed capabilities
//!
//! Declarative descriptions of what a device reports and accepts. The
//! presentation layer consumes the serialized form; this crate only builds,
//! validates and concatenates them.

use crate::utils::label_from_name;
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

bitflags! {
    /// Access rights of an exposed property
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        /// Published in device state
        const STATE = 0b001;
        /// Can be set
        const SET = 0b010;
        /// Can be read on request
        const GET = 0b100;
        const STATE_SET = Self::STATE.bits() | Self::SET.bits();
        const STATE_GET = Self::STATE.bits() | Self::GET.bits();
        const ALL = Self::STATE.bits() | Self::SET.bits() | Self::GET.bits();
    }
}

impl Serialize for Access {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Access::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid access bits: {bits}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposeKind {
    Numeric,
    Binary,
    Enum,
    Text,
    Composite,
    Switch,
    Light,
    Lock,
    Climate,
}

/// UI grouping hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A setting; must be settable
    Config,
    /// Device health information; must not be settable
    Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub value: Value,
    pub description: String,
}

/// One exposed capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expose {
    #[serde(rename = "type")]
    pub kind: ExposeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<Preset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_on: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_off: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Expose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl Expose {
    fn base(kind: ExposeKind) -> Self {
        Self {
            kind,
            name: None,
            label: None,
            property: None,
            access: None,
            description: None,
            unit: None,
            value_min: None,
            value_max: None,
            value_step: None,
            presets: Vec::new(),
            values: Vec::new(),
            value_on: None,
            value_off: None,
            features: Vec::new(),
            endpoint: None,
            category: None,
        }
    }

    fn named(kind: ExposeKind, name: &str, access: Access) -> Self {
        Self {
            name: Some(name.to_string()),
            label: Some(label_from_name(name)),
            property: Some(name.to_string()),
            access: Some(access),
            ..Self::base(kind)
        }
    }

    #[must_use]
    pub fn numeric(name: &str, access: Access) -> Self {
        Self::named(ExposeKind::Numeric, name, access)
    }

    #[must_use]
    pub fn binary(name: &str, access: Access, value_on: Value, value_off: Value) -> Self {
        Self {
            value_on: Some(value_on),
            value_off: Some(value_off),
            ..Self::named(ExposeKind::Binary, name, access)
        }
    }

    #[must_use]
    pub fn enumeration(name: &str, access: Access, values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| (*v).to_string()).collect(),
            ..Self::named(ExposeKind::Enum, name, access)
        }
    }

    #[must_use]
    pub fn text(name: &str, access: Access) -> Self {
        Self::named(ExposeKind::Text, name, access)
    }

    /// Composite published under `property` as an object
    #[must_use]
    pub fn composite(name: &str, property: &str, access: Access) -> Self {
        Self {
            property: Some(property.to_string()),
            ..Self::named(ExposeKind::Composite, name, access)
        }
    }

    /// Switch with an ON/OFF `state` feature
    #[must_use]
    pub fn switch() -> Self {
        Self::base(ExposeKind::Switch).with_feature(
            Self::binary("state", Access::ALL, Value::from("ON"), Value::from("OFF"))
                .with_description("On/off state of the switch"),
        )
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn with_value_min(mut self, value: f64) -> Self {
        self.value_min = Some(value);
        self
    }

    #[must_use]
    pub fn with_value_max(mut self, value: f64) -> Self {
        self.value_max = Some(value);
        self
    }

    #[must_use]
    pub fn with_value_step(mut self, value: f64) -> Self {
        self.value_step = Some(value);
        self
    }

    #[must_use]
    pub fn with_preset(mut self, name: &str, value: Value, description: &str) -> Self {
        self.presets.push(Preset {
            name: name.to_string(),
            value,
            description: description.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_feature(mut self, feature: Expose) -> Self {
        self.features.push(feature);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Qualify with an endpoint name; the property becomes `<property>_<endpoint>`
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        if let Some(property) = self.property.take() {
            self.property = Some(format!("{property}_{endpoint}"));
        }
        self.features = self
            .features
            .into_iter()
            .map(|feature| feature.with_endpoint(endpoint))
            .collect();
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Whether this capability (or any feature) is called `name`
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name) || self.features.iter().any(|f| f.has_name(name))
    }

    /// Published properties of this capability and its features
    #[must_use]
    pub fn properties(&self) -> Vec<String> {
        let mut properties: Vec<String> = self.property.iter().cloned().collect();
        for feature in &self.features {
            properties.extend(feature.properties());
        }
        properties
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), String> {
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{:?}", self.kind).to_lowercase());
        let settable = self.access.is_some_and(|a| a.contains(Access::SET));
        match self.category {
            Some(Category::Config) if self.access.is_some() && !settable => {
                return Err(format!("{label}: config category requires SET access"));
            }
            Some(Category::Diagnostic) if settable => {
                return Err(format!("{label}: diagnostic category must not be settable"));
            }
            _ => {}
        }
        if let (Some(min), Some(max)) = (self.value_min, self.value_max) {
            if min > max {
                return Err(format!("{label}: value_min {min} exceeds value_max {max}"));
            }
        }
        if self.kind == ExposeKind::Enum && self.values.is_empty() {
            return Err(format!("{label}: enum without values"));
        }
        self.features.iter().try_for_each(Expose::validate)
    }
}

/// Frequently used capabilities
pub mod presets {
    use super::{Access, Category, Expose};
    use serde_json::Value;

    #[must_use]
    pub fn linkquality() -> Expose {
        Expose::numeric("linkquality", Access::STATE)
            .with_unit("lqi")
            .with_description("Link quality (signal strength)")
            .with_value_min(0.0)
            .with_value_max(255.0)
            .with_category(Category::Diagnostic)
    }

    #[must_use]
    pub fn battery() -> Expose {
        Expose::numeric("battery", Access::STATE_GET)
            .with_unit("%")
            .with_description("Remaining battery in %")
            .with_value_min(0.0)
            .with_value_max(100.0)
            .with_category(Category::Diagnostic)
    }

    #[must_use]
    pub fn battery_voltage() -> Expose {
        Expose::numeric("voltage", Access::STATE_GET)
            .with_unit("mV")
            .with_description("Voltage of the battery in millivolts")
            .with_category(Category::Diagnostic)
    }

    #[must_use]
    pub fn battery_low() -> Expose {
        Expose::binary("battery_low", Access::STATE, Value::Bool(true), Value::Bool(false))
            .with_description("Indicates if the battery of this device is almost empty")
            .with_category(Category::Diagnostic)
    }

    #[must_use]
    pub fn temperature() -> Expose {
        Expose::numeric("temperature", Access::STATE_GET)
            .with_unit("°C")
            .with_description("Measured temperature value")
    }

    #[must_use]
    pub fn humidity() -> Expose {
        Expose::numeric("humidity", Access::STATE_GET)
            .with_unit("%")
            .with_description("Measured relative humidity")
    }

    #[must_use]
    pub fn pressure() -> Expose {
        Expose::numeric("pressure", Access::STATE_GET)
            .with_unit("hPa")
            .with_description("The measured atmospheric pressure")
    }

    #[must_use]
    pub fn illuminance() -> Expose {
        Expose::numeric("illuminance", Access::STATE_GET)
            .with_description("Raw measured illuminance")
    }

    #[must_use]
    pub fn illuminance_lux() -> Expose {
        Expose::numeric("illuminance_lux", Access::STATE_GET)
            .with_unit("lx")
            .with_description("Measured illuminance in lux")
    }

    #[must_use]
    pub fn occupancy() -> Expose {
        Expose::binary("occupancy", Access::STATE_GET, Value::Bool(true), Value::Bool(false))
            .with_description("Indicates whether the device detected occupancy")
    }

    #[must_use]
    pub fn power() -> Expose {
        Expose::numeric("power", Access::STATE_GET)
            .with_unit("W")
            .with_description("Instantaneous measured power")
    }

    #[must_use]
    pub fn voltage() -> Expose {
        Expose::numeric("voltage", Access::STATE_GET)
            .with_unit("V")
            .with_description("Measured electrical potential value")
    }

    #[must_use]
    pub fn current() -> Expose {
        Expose::numeric("current", Access::STATE_GET)
            .with_unit("A")
            .with_description("Instantaneous measured electrical current")
    }

    #[must_use]
    pub fn energy() -> Expose {
        Expose::numeric("energy", Access::STATE_GET)
            .with_unit("kWh")
            .with_description("Sum of consumed energy")
    }

    #[must_use]
    pub fn child_lock() -> Expose {
        Expose::binary("child_lock", Access::ALL, Value::from("LOCK"), Value::from("UNLOCK"))
            .with_description("Enables/disables physical input on the device")
    }

    #[must_use]
    pub fn identify() -> Expose {
        Expose::enumeration("identify", Access::SET, &["identify"])
            .with_description("Initiate device identification")
            .with_category(Category::Config)
    }

    #[must_use]
    pub fn action(values: &[&str]) -> Expose {
        Expose::enumeration("action", Access::STATE, values)
            .with_description("Triggered action (e.g. a button click)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_bits() {
        assert_eq!(Access::STATE_SET.bits(), 3);
        assert_eq!(Access::STATE_GET.bits(), 5);
        assert_eq!(Access::ALL.bits(), 7);
        assert!(Access::ALL.contains(Access::SET));
    }

    #[test]
    fn test_serialize_numeric() {
        let expose = presets::temperature().with_endpoint("l1");
        let json = serde_json::to_value(&expose).unwrap();
        assert_eq!(json["type"], json!("numeric"));
        assert_eq!(json["name"], json!("temperature"));
        assert_eq!(json["property"], json!("temperature_l1"));
        assert_eq!(json["endpoint"], json!("l1"));
        assert_eq!(json["access"], json!(5));
        assert_eq!(json["unit"], json!("°C"));
        assert!(json.get("values").is_none());
    }

    #[test]
    fn test_switch_endpoint_applies_to_features() {
        let expose = Expose::switch().with_endpoint("left");
        assert_eq!(expose.properties(), vec!["state_left".to_string()]);
        assert!(expose.has_name("state"));
    }

    #[test]
    fn test_validate_categories() {
        assert!(presets::linkquality().validate().is_ok());
        assert!(presets::identify().validate().is_ok());

        let settable_diagnostic = Expose::numeric("reset_count", Access::ALL)
            .with_category(Category::Diagnostic);
        assert!(settable_diagnostic.validate().is_err());

        let readonly_config =
            Expose::numeric("timeout", Access::STATE).with_category(Category::Config);
        assert!(readonly_config.validate().is_err());
    }

    #[test]
    fn test_validate_ranges_and_enums() {
        let inverted = Expose::numeric("level", Access::ALL)
            .with_value_min(10.0)
            .with_value_max(1.0);
        assert!(inverted.validate().is_err());
        assert!(Expose::enumeration("mode", Access::ALL, &[]).validate().is_err());
    }

    #[test]
    fn test_access_roundtrip_rejects_unknown_bits() {
        assert!(serde_json::from_value::<Access>(json!(8)).is_err());
        assert_eq!(serde_json::from_value::<Access>(json!(7)).unwrap(), Access::ALL);
    }
}
