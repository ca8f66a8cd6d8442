//! Data models for declarative device definitions

use crate::definition::{Definition, DefinitionBuilder, DefinitionMeta, EndpointMap};
use crate::error::AssemblyError;
use crate::extend::{self, Extend};
use crate::fingerprint::{Fingerprint, WhiteLabel};
use crate::state::MergePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A device definition described as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredDefinition {
    /// Unique model name
    pub model: String,
    pub vendor: String,
    pub description: String,
    /// Basic cluster model ids served by this definition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zigbee_model: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<Fingerprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub white_label: Vec<WhiteLabel>,
    /// Fragments, applied in order
    #[serde(default)]
    pub extend: Vec<ExtendSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DefinitionMeta>,
    /// Static endpoint name map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<BTreeMap<String, u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_policy: Option<MergePolicy>,
}

/// One extend fragment with its options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtendSpec {
    Numeric(extend::NumericArgs),
    Binary(extend::BinaryArgs),
    EnumLookup(extend::EnumLookupArgs),
    ActionEnumLookup(extend::ActionEnumLookupArgs),
    ConfigBlob(extend::ConfigBlobArgs),
    OnOff(extend::OnOffArgs),
    Identify,
    ChildLock,
    DeviceEndpoints(extend::DeviceEndpointsArgs),
    CommandActions(extend::CommandActionsArgs),
    TimeSync,
    Temperature(extend::MeasurementArgs),
    Humidity(extend::MeasurementArgs),
    Pressure(extend::MeasurementArgs),
    Illuminance(extend::MeasurementArgs),
    Occupancy(extend::MeasurementArgs),
    Battery(extend::BatteryArgs),
    ElectricityMeter(extend::ElectricityMeterArgs),
}

impl ExtendSpec {
    /// Instantiate the fragment
    #[must_use]
    pub fn build(&self) -> Extend {
        match self {
            Self::Numeric(args) => extend::numeric(args.clone()),
            Self::Binary(args) => extend::binary(args.clone()),
            Self::EnumLookup(args) => extend::enum_lookup(args.clone()),
            Self::ActionEnumLookup(args) => extend::action_enum_lookup(args.clone()),
            Self::ConfigBlob(args) => extend::config_blob(args.clone()),
            Self::OnOff(args) => extend::on_off(args.clone()),
            Self::Identify => extend::identify(),
            Self::ChildLock => extend::child_lock(),
            Self::DeviceEndpoints(args) => extend::device_endpoints(args.clone()),
            Self::CommandActions(args) => extend::command_actions(args.clone()),
            Self::TimeSync => extend::time_sync(),
            Self::Temperature(args) => extend::temperature(args.clone()),
            Self::Humidity(args) => extend::humidity(args.clone()),
            Self::Pressure(args) => extend::pressure(args.clone()),
            Self::Illuminance(args) => extend::illuminance(args.clone()),
            Self::Occupancy(args) => extend::occupancy(args.clone()),
            Self::Battery(args) => extend::battery(args.clone()),
            Self::ElectricityMeter(args) => extend::electricity_meter(args.clone()),
        }
    }
}

impl DeclaredDefinition {
    #[must_use]
    pub fn new(model: &str, vendor: &str, description: &str) -> Self {
        Self {
            model: model.to_string(),
            vendor: vendor.to_string(),
            description: description.to_string(),
            zigbee_model: Vec::new(),
            fingerprint: Vec::new(),
            white_label: Vec::new(),
            extend: Vec::new(),
            meta: None,
            endpoints: None,
            merge_policy: None,
        }
    }

    #[must_use]
    pub fn with_zigbee_model(mut self, model: &str) -> Self {
        self.zigbee_model.push(model.to_string());
        self
    }

    #[must_use]
    pub fn with_extend(mut self, spec: ExtendSpec) -> Self {
        self.extend.push(spec);
        self
    }

    /// Assemble into an immutable [`Definition`]
    pub fn assemble(&self) -> Result<Definition, AssemblyError> {
        self.builder().build()
    }

    pub(crate) fn builder(&self) -> DefinitionBuilder {
        let mut builder = DefinitionBuilder::new(&self.model, &self.vendor, &self.description);
        for model in &self.zigbee_model {
            builder = builder.zigbee_model(model);
        }
        for fingerprint in &self.fingerprint {
            builder = builder.fingerprint(fingerprint.clone());
        }
        for white_label in &self.white_label {
            builder = builder.white_label(white_label.clone());
        }
        for spec in &self.extend {
            builder = builder.extend(spec.build());
        }
        if let Some(meta) = &self.meta {
            builder = builder.meta(meta.clone());
        }
        if let Some(endpoints) = &self.endpoints {
            builder = builder.endpoints(EndpointMap::Static(endpoints.clone()));
        }
        if let Some(policy) = self.merge_policy {
            builder = builder.merge_policy(policy);
        }
        builder
    }
}
