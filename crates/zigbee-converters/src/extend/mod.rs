//! Extend fragments
//!
//! An extend is a named bundle of converters, exposes and configure steps
//! produced by a pure factory function. Definitions are assembled from a list
//! of extends; see [`crate::definition::DefinitionBuilder`].

pub mod attribute;
pub mod electrical;
pub mod general;
pub mod measurement;

pub use attribute::{
    action_enum_lookup, binary, config_blob, enum_lookup, numeric, ActionEnumLookupArgs,
    BinaryArgs, ConfigBlobArgs, EnumLookupArgs, NumericArgs, ReportingArgs,
};
pub use electrical::{electricity_meter, ElectricityMeterArgs, MeterCluster};
pub use general::{
    child_lock, command_actions, device_endpoints, identify, on_off, time_sync, zigbee_time,
    CommandActionsArgs, DeviceEndpointsArgs, OnOffArgs,
};
pub use measurement::{
    battery, humidity, illuminance, occupancy, pressure, temperature, BatteryArgs,
    MeasurementArgs,
};

use crate::configure::{ConfigureContext, ConfigureStep};
use crate::definition::{DefinitionMeta, EndpointMap};
use crate::error::ConvertError;
use crate::exposes::Expose;
use crate::fz::FromZigbee;
use crate::tz::ToZigbee;
use std::sync::Arc;
use zigbee_core::{ClusterRef, ZclEndpoint};

/// A reusable bundle contributed to a definition
#[derive(Clone, Default)]
pub struct Extend {
    pub name: String,
    pub from_zigbee: Vec<Arc<dyn FromZigbee>>,
    pub to_zigbee: Vec<Arc<dyn ToZigbee>>,
    pub exposes: Vec<Expose>,
    pub configure: Vec<ConfigureStep>,
    pub meta: Option<DefinitionMeta>,
    pub endpoints: Option<EndpointMap>,
    /// Assembly fails unless some source supplies an endpoint map
    pub requires_endpoint_map: bool,
}

impl std::fmt::Debug for Extend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extend")
            .field("name", &self.name)
            .field("from_zigbee", &self.from_zigbee.len())
            .field("to_zigbee", &self.to_zigbee.len())
            .field("exposes", &self.exposes)
            .field("configure", &self.configure)
            .finish_non_exhaustive()
    }
}

impl Extend {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_from_zigbee(mut self, converter: impl FromZigbee + 'static) -> Self {
        self.from_zigbee.push(Arc::new(converter));
        self
    }

    #[must_use]
    pub fn with_to_zigbee(mut self, converter: impl ToZigbee + 'static) -> Self {
        self.to_zigbee.push(Arc::new(converter));
        self
    }

    #[must_use]
    pub fn with_expose(mut self, expose: Expose) -> Self {
        self.exposes.push(expose);
        self
    }

    #[must_use]
    pub fn with_configure(mut self, step: ConfigureStep) -> Self {
        self.configure.push(step);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: DefinitionMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointMap) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    #[must_use]
    pub fn requiring_endpoint_map(mut self) -> Self {
        self.requires_endpoint_map = true;
        self
    }
}

/// Endpoints a configure step should touch.
///
/// Named endpoints when given, otherwise every endpoint serving `cluster`.
pub(crate) fn target_endpoints(
    ctx: &ConfigureContext,
    names: Option<&[String]>,
    cluster: &ClusterRef,
) -> Result<Vec<Arc<dyn ZclEndpoint>>, ConvertError> {
    match names {
        Some(names) => names.iter().map(|name| ctx.named_endpoint(name)).collect(),
        None => Ok(cluster
            .id()
            .map(|id| ctx.endpoints_with(id))
            .unwrap_or_else(|| ctx.device.endpoints())),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::definition::Definition;
    use crate::fz::FzMeta;
    use crate::state::{PartialMerge, State};
    use crate::store::DeviceStore;
    use zigbee_core::{ZclMessage, ZigbeeDevice};

    /// Run every matching inbound converter of `definition` over `msg`
    pub(crate) fn decode(
        definition: &Definition,
        device: &ZigbeeDevice,
        msg: &ZclMessage,
        options: &State,
    ) -> State {
        let mut store = DeviceStore::default();
        decode_inner(definition, device, msg, options, &mut store)
    }

    pub(crate) fn decode_with_store(
        definition: &Definition,
        device: &ZigbeeDevice,
        msg: &ZclMessage,
        store: &mut DeviceStore,
    ) -> State {
        decode_inner(definition, device, msg, &State::new(), store)
    }

    fn decode_inner(
        definition: &Definition,
        device: &ZigbeeDevice,
        msg: &ZclMessage,
        options: &State,
        store: &mut DeviceStore,
    ) -> State {
        let names = definition.endpoint_names(device);
        let state = State::new();
        let mut meta = FzMeta::new(definition, device, store, &state, options, &names);
        let mut merge = PartialMerge::new(definition.merge_policy);
        for converter in definition.from_zigbee.matching(msg) {
            if let Some(partial) = converter.convert(msg, &mut meta) {
                merge.add(converter.name(), partial);
            }
        }
        merge.finish()
    }
}
