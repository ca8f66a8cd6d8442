//! Generic single-attribute extends
//!
//! Each factory takes the cluster, attribute and presentation of one value
//! and produces the inbound decoder, the outbound converter, the expose and
//! optionally a reporting configure step.

use super::{target_endpoints, Extend};
use crate::codec::ValueCodec;
use crate::configure::ConfigureStep;
use crate::definition::DefinitionMeta;
use crate::exposes::{Access, Category, Expose};
use crate::fz::{FzConverter, FzMeta};
use crate::reporting;
use crate::state::State;
use crate::tz::{AttributeConverter, KeyPrecedence};
use crate::utils::{lookup_name, number, precision_round};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zigbee_core::{AttributeRef, ClusterRef, ReportableChange, ZclMessage, ZclOptions};

fn default_access() -> Access {
    Access::ALL
}

fn default_action() -> String {
    "action".to_string()
}

/// Reporting configured for the attribute of an extend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportingArgs {
    pub min: u16,
    pub max: u16,
    pub change: ReportableChange,
}

/// Bind `cluster` and configure reporting of `attribute` on the target endpoints
pub(crate) fn reporting_step(
    name: &str,
    cluster: ClusterRef,
    attribute: AttributeRef,
    endpoint_names: Option<Vec<String>>,
    reporting: ReportingArgs,
    options: ZclOptions,
) -> ConfigureStep {
    ConfigureStep::new(&format!("{name}_reporting"), move |ctx| {
        let cluster = cluster.clone();
        let attribute = attribute.clone();
        let endpoint_names = endpoint_names.clone();
        let options = options.clone();
        Box::pin(async move {
            for endpoint in target_endpoints(&ctx, endpoint_names.as_deref(), &cluster)? {
                endpoint.bind(&cluster, &ctx.coordinator).await?;
                let items = reporting::payload(
                    attribute.clone(),
                    reporting.min,
                    reporting.max,
                    reporting.change,
                    None,
                );
                endpoint.configure_reporting(&cluster, &items, &options).await?;
            }
            Ok(())
        })
    })
}

/// Whether `msg` comes from one of `endpoint_names` (always true without a restriction)
pub(crate) fn from_listed_endpoint(
    endpoint_names: Option<&[String]>,
    msg: &ZclMessage,
    meta: &FzMeta<'_>,
) -> bool {
    match endpoint_names {
        None => true,
        Some(names) => meta
            .endpoint_name(msg)
            .is_some_and(|name| names.iter().any(|n| n == name)),
    }
}

pub(crate) fn single(property: String, value: Value) -> State {
    let mut state = State::new();
    state.insert(property, value);
    state
}

/// Outbound converters for `name`: one cooperative converter per endpoint when restricted
#[allow(clippy::too_many_arguments)]
fn attribute_converters(
    extend: Extend,
    name: &str,
    cluster: &ClusterRef,
    attribute: &AttributeRef,
    codec: &ValueCodec,
    access: Access,
    endpoint_names: Option<&[String]>,
    zcl_options: Option<&ZclOptions>,
) -> Extend {
    if !access.intersects(Access::SET | Access::GET) {
        return extend;
    }
    let base = AttributeConverter::new(name, cluster.clone(), attribute.clone(), codec.clone())
        .read_only(!access.contains(Access::SET));
    let base = match zcl_options {
        Some(options) => base.with_zcl_options(options.clone()),
        None => base,
    };
    match endpoint_names {
        None => extend.with_to_zigbee(base),
        Some(names) => names.iter().fold(extend, |extend, endpoint| {
            extend.with_to_zigbee(
                base.clone()
                    .for_endpoints(&[endpoint.as_str()])
                    .with_precedence(KeyPrecedence::Cooperative),
            )
        }),
    }
}

/// The expose once, or once per endpoint
pub(crate) fn per_endpoint(extend: Extend, expose: Expose, endpoint_names: Option<&[String]>) -> Extend {
    match endpoint_names {
        None => extend.with_expose(expose),
        Some(names) => names.iter().fold(extend, |extend, endpoint| {
            extend.with_expose(expose.clone().with_endpoint(endpoint))
        }),
    }
}

/// Multi endpoint extends need the endpoint map and suffixed properties
pub(crate) fn endpoint_requirements(extend: Extend, endpoint_names: Option<&[String]>) -> Extend {
    if endpoint_names.is_none() {
        return extend;
    }
    extend.requiring_endpoint_map().with_meta(DefinitionMeta {
        multi_endpoint: Some(true),
        ..DefinitionMeta::default()
    })
}

/// Numeric attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArgs {
    pub name: String,
    pub cluster: ClusterRef,
    pub attribute: AttributeRef,
    #[serde(default = "default_access")]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// `decoded = raw / scale`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zcl_options: Option<ZclOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl NumericArgs {
    #[must_use]
    pub fn new(name: &str, cluster: impl Into<ClusterRef>, attribute: impl Into<AttributeRef>) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.into(),
            attribute: attribute.into(),
            access: Access::ALL,
            description: None,
            unit: None,
            scale: None,
            precision: None,
            value_min: None,
            value_max: None,
            value_step: None,
            endpoint_names: None,
            reporting: None,
            zcl_options: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f64, precision: u32) -> Self {
        self.scale = Some(scale);
        self.precision = Some(precision);
        self
    }

    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.value_min = Some(min);
        self.value_max = Some(max);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.value_step = Some(step);
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_reporting(mut self, min: u16, max: u16, change: impl Into<ReportableChange>) -> Self {
        self.reporting = Some(ReportingArgs {
            min,
            max,
            change: change.into(),
        });
        self
    }

    #[must_use]
    pub fn with_zcl_options(mut self, options: ZclOptions) -> Self {
        self.zcl_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// Apply `<name>_calibration` and `<name>_precision` when the user set them
fn calibrate(value: f64, options: &State, name: &str, precision: Option<u32>) -> f64 {
    let offset = options
        .get(&format!("{name}_calibration"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let precision = options
        .get(&format!("{name}_precision"))
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .or(precision);
    let calibrated = value + offset;
    match precision {
        Some(precision) => precision_round(calibrated, precision),
        None => calibrated,
    }
}

#[must_use]
pub fn numeric(args: NumericArgs) -> Extend {
    let codec = ValueCodec::Numeric {
        scale: args.scale,
        precision: args.precision,
        min: args.value_min,
        max: args.value_max,
    };
    let endpoints = args.endpoint_names.as_deref();

    let decode_codec = codec.clone();
    let name = args.name.clone();
    let attribute_key = args.attribute.key();
    let filter = args.endpoint_names.clone();
    let precision = args.precision;
    let inbound = FzConverter::new(
        &args.name,
        args.cluster.clone(),
        &FzConverter::attribute_types(),
        move |msg, meta| {
            let raw = msg.attribute(&attribute_key)?;
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            let decoded = decode_codec.decode(raw)?.as_f64()?;
            let value = number(calibrate(decoded, meta.options, &name, precision));
            Some(single(meta.postfix_with_endpoint_name(&name, msg), value))
        },
    );

    let mut expose = Expose::numeric(&args.name, args.access);
    if let Some(description) = &args.description {
        expose = expose.with_description(description);
    }
    if let Some(unit) = &args.unit {
        expose = expose.with_unit(unit);
    }
    if let Some(min) = args.value_min {
        expose = expose.with_value_min(min);
    }
    if let Some(max) = args.value_max {
        expose = expose.with_value_max(max);
    }
    if let Some(step) = args.value_step {
        expose = expose.with_value_step(step);
    }
    if let Some(category) = args.category {
        expose = expose.with_category(category);
    }

    let mut extend = Extend::new(&args.name).with_from_zigbee(inbound);
    extend = attribute_converters(
        extend,
        &args.name,
        &args.cluster,
        &args.attribute,
        &codec,
        args.access,
        endpoints,
        args.zcl_options.as_ref(),
    );
    extend = per_endpoint(extend, expose, endpoints);
    if let Some(reporting) = args.reporting {
        extend = extend.with_configure(reporting_step(
            &args.name,
            args.cluster.clone(),
            args.attribute.clone(),
            args.endpoint_names.clone(),
            reporting,
            args.zcl_options.clone().unwrap_or_default(),
        ));
    }
    endpoint_requirements(extend, endpoints)
}

/// Two-valued attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryArgs {
    pub name: String,
    pub cluster: ClusterRef,
    pub attribute: AttributeRef,
    /// `(state value, raw value)`
    pub value_on: (Value, Value),
    pub value_off: (Value, Value),
    #[serde(default = "default_access")]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zcl_options: Option<ZclOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl BinaryArgs {
    #[must_use]
    pub fn new(
        name: &str,
        cluster: impl Into<ClusterRef>,
        attribute: impl Into<AttributeRef>,
        value_on: (Value, Value),
        value_off: (Value, Value),
    ) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.into(),
            attribute: attribute.into(),
            value_on,
            value_off,
            access: Access::ALL,
            description: None,
            endpoint_names: None,
            reporting: None,
            zcl_options: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_reporting(mut self, min: u16, max: u16, change: impl Into<ReportableChange>) -> Self {
        self.reporting = Some(ReportingArgs {
            min,
            max,
            change: change.into(),
        });
        self
    }

    #[must_use]
    pub fn with_zcl_options(mut self, options: ZclOptions) -> Self {
        self.zcl_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

#[must_use]
pub fn binary(args: BinaryArgs) -> Extend {
    let codec = ValueCodec::Binary {
        on: args.value_on.clone(),
        off: args.value_off.clone(),
    };
    let endpoints = args.endpoint_names.as_deref();

    let decode_codec = codec.clone();
    let name = args.name.clone();
    let attribute_key = args.attribute.key();
    let filter = args.endpoint_names.clone();
    let inbound = FzConverter::new(
        &args.name,
        args.cluster.clone(),
        &FzConverter::attribute_types(),
        move |msg, meta| {
            let raw = msg.attribute(&attribute_key)?;
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            let value = decode_codec.decode(raw)?;
            Some(single(meta.postfix_with_endpoint_name(&name, msg), value))
        },
    );

    let mut expose = Expose::binary(
        &args.name,
        args.access,
        args.value_on.0.clone(),
        args.value_off.0.clone(),
    );
    if let Some(description) = &args.description {
        expose = expose.with_description(description);
    }
    if let Some(category) = args.category {
        expose = expose.with_category(category);
    }

    let mut extend = Extend::new(&args.name).with_from_zigbee(inbound);
    extend = attribute_converters(
        extend,
        &args.name,
        &args.cluster,
        &args.attribute,
        &codec,
        args.access,
        endpoints,
        args.zcl_options.as_ref(),
    );
    extend = per_endpoint(extend, expose, endpoints);
    if let Some(reporting) = args.reporting {
        extend = extend.with_configure(reporting_step(
            &args.name,
            args.cluster.clone(),
            args.attribute.clone(),
            args.endpoint_names.clone(),
            reporting,
            args.zcl_options.clone().unwrap_or_default(),
        ));
    }
    endpoint_requirements(extend, endpoints)
}

/// Attribute with named raw values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumLookupArgs {
    pub name: String,
    pub cluster: ClusterRef,
    pub attribute: AttributeRef,
    /// `(name, raw value)` pairs in presentation order
    pub lookup: Vec<(String, Value)>,
    #[serde(default = "default_access")]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zcl_options: Option<ZclOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl EnumLookupArgs {
    #[must_use]
    pub fn new(
        name: &str,
        cluster: impl Into<ClusterRef>,
        attribute: impl Into<AttributeRef>,
        lookup: &[(&str, Value)],
    ) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.into(),
            attribute: attribute.into(),
            lookup: lookup
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
            access: Access::ALL,
            description: None,
            endpoint_names: None,
            zcl_options: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_zcl_options(mut self, options: ZclOptions) -> Self {
        self.zcl_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    fn names(&self) -> Vec<&str> {
        self.lookup.iter().map(|(name, _)| name.as_str()).collect()
    }
}

#[must_use]
pub fn enum_lookup(args: EnumLookupArgs) -> Extend {
    let codec = ValueCodec::Lookup {
        values: args.lookup.clone(),
    };
    let endpoints = args.endpoint_names.as_deref();

    let decode_codec = codec.clone();
    let name = args.name.clone();
    let attribute_key = args.attribute.key();
    let filter = args.endpoint_names.clone();
    let inbound = FzConverter::new(
        &args.name,
        args.cluster.clone(),
        &FzConverter::attribute_types(),
        move |msg, meta| {
            let raw = msg.attribute(&attribute_key)?;
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            let value = decode_codec.decode(raw)?;
            Some(single(meta.postfix_with_endpoint_name(&name, msg), value))
        },
    );

    let mut expose = Expose::enumeration(&args.name, args.access, &args.names());
    if let Some(description) = &args.description {
        expose = expose.with_description(description);
    }
    if let Some(category) = args.category {
        expose = expose.with_category(category);
    }

    let mut extend = Extend::new(&args.name).with_from_zigbee(inbound);
    extend = attribute_converters(
        extend,
        &args.name,
        &args.cluster,
        &args.attribute,
        &codec,
        args.access,
        endpoints,
        args.zcl_options.as_ref(),
    );
    extend = per_endpoint(extend, expose, endpoints);
    endpoint_requirements(extend, endpoints)
}

/// Attribute whose reported values are published as actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnumLookupArgs {
    #[serde(default = "default_action")]
    pub name: String,
    pub cluster: ClusterRef,
    pub attribute: AttributeRef,
    pub lookup: Vec<(String, Value)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
}

impl ActionEnumLookupArgs {
    #[must_use]
    pub fn new(cluster: impl Into<ClusterRef>, attribute: impl Into<AttributeRef>, lookup: &[(&str, Value)]) -> Self {
        Self {
            name: default_action(),
            cluster: cluster.into(),
            attribute: attribute.into(),
            lookup: lookup
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
            endpoint_names: None,
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }
}

#[must_use]
pub fn action_enum_lookup(args: ActionEnumLookupArgs) -> Extend {
    let name = args.name.clone();
    let attribute_key = args.attribute.key();
    let lookup = args.lookup.clone();
    let filter = args.endpoint_names.clone();
    let event = format!("{}_{}", args.name, attribute_key);
    let inbound = FzConverter::new(
        &args.name,
        args.cluster.clone(),
        &FzConverter::attribute_types(),
        move |msg, meta| {
            let raw = msg.attribute(&attribute_key)?;
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            let action = lookup_name(&lookup, raw)?;
            if meta.is_duplicate(msg, &event) {
                return None;
            }
            let action = match (&filter, meta.endpoint_name(msg)) {
                (Some(_), Some(endpoint)) => format!("{action}_{endpoint}"),
                _ => action.to_string(),
            };
            Some(single(name.clone(), Value::from(action)))
        },
    );

    let values: Vec<String> = match &args.endpoint_names {
        None => args.lookup.iter().map(|(n, _)| n.clone()).collect(),
        Some(endpoints) => args
            .lookup
            .iter()
            .flat_map(|(n, _)| endpoints.iter().map(move |e| format!("{n}_{e}")))
            .collect(),
    };
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    let expose = Expose::enumeration(&args.name, Access::STATE, &values)
        .with_description("Triggered action (e.g. a button click)");

    let extend = Extend::new(&args.name)
        .with_from_zigbee(inbound)
        .with_expose(expose);
    if args.endpoint_names.is_some() {
        extend.requiring_endpoint_map()
    } else {
        extend
    }
}

/// Fixed-length octet string configuration written as hex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBlobArgs {
    pub name: String,
    pub cluster: ClusterRef,
    pub attribute: AttributeRef,
    /// Byte length of the blob
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zcl_options: Option<ZclOptions>,
}

impl ConfigBlobArgs {
    #[must_use]
    pub fn new(name: &str, cluster: impl Into<ClusterRef>, attribute: impl Into<AttributeRef>, length: usize) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.into(),
            attribute: attribute.into(),
            length,
            description: None,
            zcl_options: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn with_zcl_options(mut self, options: ZclOptions) -> Self {
        self.zcl_options = Some(options);
        self
    }
}

#[must_use]
pub fn config_blob(args: ConfigBlobArgs) -> Extend {
    let codec = ValueCodec::HexBytes {
        length: args.length,
    };

    let decode_codec = codec.clone();
    let name = args.name.clone();
    let attribute_key = args.attribute.key();
    let inbound = FzConverter::new(
        &args.name,
        args.cluster.clone(),
        &FzConverter::attribute_types(),
        move |msg, _meta| {
            let value = decode_codec.decode(msg.attribute(&attribute_key)?)?;
            Some(single(name.clone(), value))
        },
    );

    let mut expose = Expose::text(&args.name, Access::ALL).with_category(Category::Config);
    if let Some(description) = &args.description {
        expose = expose.with_description(description);
    }

    let extend = Extend::new(&args.name)
        .with_from_zigbee(inbound)
        .with_expose(expose);
    attribute_converters(
        extend,
        &args.name,
        &args.cluster,
        &args.attribute,
        &codec,
        Access::ALL,
        None,
        args.zcl_options.as_ref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionBuilder, EndpointMap};
    use crate::error::ConvertError;
    use crate::extend::test_support::{decode, decode_with_store};
    use crate::tz::TzMeta;
    use serde_json::json;
    use zigbee_core::recording::{RecordingDevice, StackCall};
    use zigbee_core::{Endpoint, ZclDevice, ZigbeeDevice};

    fn two_gang() -> ZigbeeDevice {
        ZigbeeDevice::new([5; 8], 5)
            .with_endpoint(Endpoint::new(1, &[0x0006, 0x0b04], &[]))
            .with_endpoint(Endpoint::new(2, &[0x0006, 0x0b04], &[]))
    }

    #[test]
    fn test_numeric_scale_and_endpoint_suffix() {
        let definition = DefinitionBuilder::new("PM2", "Acme", "Dual meter")
            .zigbee_model("PM2")
            .endpoints(EndpointMap::from_pairs(&[("l1", 1), ("l2", 2)]))
            .extend(numeric(
                NumericArgs::new("power", "haElectricalMeasurement", "activePower")
                    .with_access(Access::STATE_GET)
                    .with_scale(10.0, 1)
                    .with_unit("W")
                    .with_endpoints(&["l1", "l2"]),
            ))
            .build()
            .unwrap();

        let msg = ZclMessage::attribute_report("haElectricalMeasurement", 2, json!({"activePower": 1234}));
        let state = decode(&definition, &two_gang(), &msg, &State::new());
        assert_eq!(state.get("power_l2"), Some(&json!(123.4)));

        let properties: Vec<String> = definition
            .exposes
            .iter()
            .flat_map(Expose::properties)
            .collect();
        assert!(properties.contains(&"power_l1".to_string()));
        assert!(properties.contains(&"power_l2".to_string()));
    }

    #[test]
    fn test_numeric_calibration_option() {
        let definition = DefinitionBuilder::new("SOIL", "Acme", "Soil sensor")
            .zigbee_model("SOIL")
            .extend(numeric(NumericArgs::new("soil_moisture", "msSoilMoisture", "measuredValue").with_scale(100.0, 1)))
            .build()
            .unwrap();
        let mut options = State::new();
        options.insert("soil_moisture_calibration".to_string(), json!(-2));
        let device = ZigbeeDevice::new([6; 8], 6);
        let msg = ZclMessage::attribute_report("msSoilMoisture", 1, json!({"measuredValue": 4550}));
        assert_eq!(decode(&definition, &device, &msg, &options).get("soil_moisture"), Some(&json!(43.5)));
    }

    #[test]
    fn test_enum_lookup_decodes_names() {
        let definition = DefinitionBuilder::new("PLUG", "Acme", "Plug")
            .zigbee_model("PLUG")
            .extend(enum_lookup(EnumLookupArgs::new(
                "power_on_behavior",
                "genOnOff",
                "startUpOnOff",
                &[("off", json!(0)), ("on", json!(1)), ("toggle", json!(2)), ("previous", json!(255))],
            )))
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([7; 8], 7);
        let msg = ZclMessage::attribute_report("genOnOff", 1, json!({"startUpOnOff": 255}));
        assert_eq!(
            decode(&definition, &device, &msg, &State::new()).get("power_on_behavior"),
            Some(&json!("previous"))
        );
        let unknown = ZclMessage::attribute_report("genOnOff", 1, json!({"startUpOnOff": 9}));
        assert!(decode(&definition, &device, &unknown, &State::new()).is_empty());
    }

    #[test]
    fn test_action_enum_lookup_deduplicates() {
        let definition = DefinitionBuilder::new("KNOB", "Acme", "Knob")
            .zigbee_model("KNOB")
            .extend(action_enum_lookup(ActionEnumLookupArgs::new(
                "genMultistateInput",
                "presentValue",
                &[("single", json!(1)), ("double", json!(2))],
            )))
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([8; 8], 8);
        let msg = ZclMessage::attribute_report("genMultistateInput", 1, json!({"presentValue": 2}))
            .with_transaction_sequence_number(42);

        let mut store = crate::store::DeviceStore::default();
        let first = decode_with_store(&definition, &device, &msg, &mut store);
        let second = decode_with_store(&definition, &device, &msg, &mut store);
        assert_eq!(first.get("action"), Some(&json!("double")));
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_config_blob_rejects_wrong_length_before_writing() {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Valve")
            .zigbee_model("TRV")
            .extend(config_blob(ConfigBlobArgs::new("schedule", "hvacThermostat", "weeklySchedule", 4)))
            .build()
            .unwrap();
        let device = RecordingDevice::new(
            ZigbeeDevice::new([9; 8], 9).with_endpoint(Endpoint::new(1, &[0x0201], &[])),
        );
        let state = State::new();
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let converter = definition.find_to_zigbee("schedule", None).unwrap();
        let entity = device.endpoint(1).unwrap();

        let short = converter
            .convert_set(entity.as_ref(), "schedule", &json!("0a0b0c"), &meta)
            .await;
        assert!(matches!(short, Err(ConvertError::MalformedPayload { .. })));
        assert!(device.calls().is_empty());

        converter
            .convert_set(entity.as_ref(), "schedule", &json!("0A0B0C0D"), &meta)
            .await
            .unwrap();
        assert!(matches!(
            &device.calls()[0],
            StackCall::Write { attributes, .. } if attributes[0].1 == json!([10, 11, 12, 13])
        ));
    }

    #[test]
    fn test_state_only_numeric_has_no_outbound_converter() {
        let definition = DefinitionBuilder::new("CO2", "Acme", "CO2 sensor")
            .zigbee_model("CO2")
            .extend(numeric(
                NumericArgs::new("co2", "msCO2", "measuredValue").with_access(Access::STATE),
            ))
            .build()
            .unwrap();
        assert!(definition.find_to_zigbee("co2", None).is_none());
    }
}
