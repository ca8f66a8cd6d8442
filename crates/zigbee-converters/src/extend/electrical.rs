//! Electricity meter extend
//!
//! Electrical readings arrive as raw integers scaled by multiplier/divisor
//! pairs the device exposes as attributes. Configure reads those pairs; their
//! read responses are cached in the session store and every later report is
//! scaled with them. Until a pair is known the raw value is published.

use super::attribute::{endpoint_requirements, from_listed_endpoint, per_endpoint};
use super::{target_endpoints, Extend};
use crate::codec::ValueCodec;
use crate::configure::{optional, ConfigureStep};
use crate::exposes::presets;
use crate::fz::{FzConverter, FzMeta};
use crate::reporting::{
    self, read_electrical_measurement_multiplier_divisors, read_metering_multiplier_divisor,
    Preset,
};
use crate::state::State;
use crate::store::DeviceStore;
use crate::tz::{AttributeConverter, KeyPrecedence};
use crate::utils::{number, precision_round};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zigbee_core::{ClusterRef, ZclMessage};

const ELECTRICAL: &str = "haElectricalMeasurement";
const METERING: &str = "seMetering";

/// Factor attributes cached from haElectricalMeasurement
const ELECTRICAL_FACTORS: [&str; 6] = [
    "acVoltageMultiplier",
    "acVoltageDivisor",
    "acCurrentMultiplier",
    "acCurrentDivisor",
    "acPowerMultiplier",
    "acPowerDivisor",
];

const METERING_FACTORS: [&str; 2] = ["multiplier", "divisor"];

/// Electrical readings: attribute, property, factor attribute prefix
const READINGS: [(&str, &str, &str); 3] = [
    ("activePower", "power", "acPower"),
    ("rmsVoltage", "voltage", "acVoltage"),
    ("rmsCurrent", "current", "acCurrent"),
];

fn enabled() -> bool {
    true
}

/// Which clusters the meter is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterCluster {
    /// haElectricalMeasurement and seMetering
    #[default]
    Both,
    Electrical,
    Metering,
}

impl MeterCluster {
    fn electrical(self) -> bool {
        matches!(self, Self::Both | Self::Electrical)
    }

    fn metering(self) -> bool {
        matches!(self, Self::Both | Self::Metering)
    }
}

/// Options of [`electricity_meter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricityMeterArgs {
    #[serde(default)]
    pub cluster: MeterCluster,
    #[serde(default = "enabled")]
    pub power: bool,
    #[serde(default = "enabled")]
    pub voltage: bool,
    #[serde(default = "enabled")]
    pub current: bool,
    /// Publish `energy` from seMetering
    #[serde(default = "enabled")]
    pub energy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    #[serde(default = "enabled")]
    pub configure_reporting: bool,
}

impl Default for ElectricityMeterArgs {
    fn default() -> Self {
        Self {
            cluster: MeterCluster::Both,
            power: true,
            voltage: true,
            current: true,
            energy: true,
            endpoint_names: None,
            configure_reporting: true,
        }
    }
}

impl ElectricityMeterArgs {
    #[must_use]
    pub fn with_cluster(mut self, cluster: MeterCluster) -> Self {
        self.cluster = cluster;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn without_voltage(mut self) -> Self {
        self.voltage = false;
        self
    }

    #[must_use]
    pub fn without_current(mut self) -> Self {
        self.current = false;
        self
    }

    #[must_use]
    pub fn without_reporting(mut self) -> Self {
        self.configure_reporting = false;
        self
    }

    fn publishes(&self, property: &str) -> bool {
        match property {
            "power" => self.power,
            "voltage" => self.voltage,
            "current" => self.current,
            _ => false,
        }
    }
}

fn factor_key(endpoint: u8, cluster: &str, attribute: &str) -> String {
    format!("{endpoint}_{cluster}_{attribute}")
}

/// Remember factor attributes carried by `msg`
fn cache_factors(store: &mut DeviceStore, msg: &ZclMessage, cluster: &str, attributes: &[&str]) {
    for attribute in attributes {
        if let Some(value) = msg.attribute(attribute) {
            tracing::debug!("Caching {}.{} = {} from endpoint {}", cluster, attribute, value, msg.endpoint);
            store.put(&factor_key(msg.endpoint, cluster, attribute), value.clone());
        }
    }
}

/// multiplier / divisor, or 1 while either is unknown or zero
fn factor(store: &DeviceStore, endpoint: u8, cluster: &str, multiplier: &str, divisor: &str) -> f64 {
    let cached = |attribute: &str| {
        store
            .get(&factor_key(endpoint, cluster, attribute))
            .and_then(Value::as_f64)
            .filter(|v| *v != 0.0)
    };
    match (cached(multiplier), cached(divisor)) {
        (Some(multiplier), Some(divisor)) => multiplier / divisor,
        _ => 1.0,
    }
}

/// Plain number or a `[high, low]` 48 bit pair
fn uint48(value: &Value) -> Option<f64> {
    if let Some(value) = value.as_f64() {
        return Some(value);
    }
    match value.as_array()?.as_slice() {
        [high, low] => {
            let raw = (high.as_u64()? << 32) | low.as_u64()?;
            #[allow(clippy::cast_precision_loss)]
            let raw = raw as f64;
            Some(raw)
        }
        _ => None,
    }
}

fn decode_electrical(msg: &ZclMessage, meta: &mut FzMeta<'_>, args: &ElectricityMeterArgs) -> Option<State> {
    if !from_listed_endpoint(args.endpoint_names.as_deref(), msg, meta) {
        return None;
    }
    cache_factors(meta.store, msg, ELECTRICAL, &ELECTRICAL_FACTORS);
    if meta.is_duplicate(msg, "electrical_measurement") {
        return None;
    }

    let mut state = State::new();
    for (attribute, property, prefix) in READINGS {
        if !args.publishes(property) {
            continue;
        }
        let Some(raw) = msg.attribute_f64(attribute) else {
            continue;
        };
        let scale = factor(
            meta.store,
            msg.endpoint,
            ELECTRICAL,
            &format!("{prefix}Multiplier"),
            &format!("{prefix}Divisor"),
        );
        state.insert(
            meta.postfix_with_endpoint_name(property, msg),
            number(precision_round(raw * scale, 2)),
        );
    }
    (!state.is_empty()).then_some(state)
}

fn decode_metering(msg: &ZclMessage, meta: &mut FzMeta<'_>, args: &ElectricityMeterArgs) -> Option<State> {
    if !from_listed_endpoint(args.endpoint_names.as_deref(), msg, meta) {
        return None;
    }
    cache_factors(meta.store, msg, METERING, &METERING_FACTORS);
    if meta.is_duplicate(msg, "metering") {
        return None;
    }

    let scale = factor(meta.store, msg.endpoint, METERING, "multiplier", "divisor");
    let mut state = State::new();
    // Without haElectricalMeasurement the demand is the only power reading
    if args.power && !args.cluster.electrical() {
        if let Some(demand) = msg.attribute_f64("instantaneousDemand") {
            state.insert(
                meta.postfix_with_endpoint_name("power", msg),
                number(precision_round(demand * scale, 2)),
            );
        }
    }
    if args.energy {
        if let Some(delivered) = msg.attribute("currentSummDelivered").and_then(uint48) {
            state.insert(
                meta.postfix_with_endpoint_name("energy", msg),
                number(precision_round(delivered * scale, 2)),
            );
        }
    }
    (!state.is_empty()).then_some(state)
}

fn with_getter(extend: Extend, getter: AttributeConverter, endpoints: Option<&[String]>) -> Extend {
    match endpoints {
        None => extend.with_to_zigbee(getter),
        Some(names) => names.iter().fold(extend, |extend, endpoint| {
            extend.with_to_zigbee(
                getter
                    .clone()
                    .for_endpoints(&[endpoint.as_str()])
                    .with_precedence(KeyPrecedence::Cooperative),
            )
        }),
    }
}

/// Power, voltage, current and energy of a metering plug or meter
#[must_use]
pub fn electricity_meter(args: ElectricityMeterArgs) -> Extend {
    let endpoints = args.endpoint_names.as_deref();
    let mut extend = Extend::new("electricity_meter");

    if args.cluster.electrical() {
        let decode_args = args.clone();
        extend = extend.with_from_zigbee(FzConverter::new(
            "electrical_measurement",
            ELECTRICAL,
            &FzConverter::attribute_types(),
            move |msg, meta| decode_electrical(msg, meta, &decode_args),
        ));
        for (attribute, property, _) in READINGS {
            if !args.publishes(property) {
                continue;
            }
            let getter = AttributeConverter::new(property, ELECTRICAL, attribute, ValueCodec::numeric())
                .read_only(true);
            extend = with_getter(extend, getter, endpoints);
        }
    }
    if args.cluster.metering() {
        let decode_args = args.clone();
        extend = extend.with_from_zigbee(FzConverter::new(
            "metering",
            METERING,
            &FzConverter::attribute_types(),
            move |msg, meta| decode_metering(msg, meta, &decode_args),
        ));
        if args.power && !args.cluster.electrical() {
            let getter =
                AttributeConverter::new("power", METERING, "instantaneousDemand", ValueCodec::numeric())
                    .read_only(true);
            extend = with_getter(extend, getter, endpoints);
        }
        if args.energy {
            let getter =
                AttributeConverter::new("energy", METERING, "currentSummDelivered", ValueCodec::numeric())
                    .read_only(true);
            extend = with_getter(extend, getter, endpoints);
        }
    }

    let power = args.power;
    let voltage = args.voltage && args.cluster.electrical();
    let current = args.current && args.cluster.electrical();
    let energy = args.energy && args.cluster.metering();
    for (published, expose) in [
        (power, presets::power()),
        (voltage, presets::voltage()),
        (current, presets::current()),
        (energy, presets::energy()),
    ] {
        if published {
            extend = per_endpoint(extend, expose, endpoints);
        }
    }

    if args.configure_reporting {
        let names = args.endpoint_names.clone();
        let cluster = args.cluster;
        extend = extend.with_configure(ConfigureStep::new("electricity_meter_reporting", move |ctx| {
            let names = names.clone();
            Box::pin(async move {
                let mut clusters = Vec::new();
                if cluster.electrical() {
                    clusters.push(ClusterRef::from(ELECTRICAL));
                }
                if cluster.metering() {
                    clusters.push(ClusterRef::from(METERING));
                }
                for endpoint in target_endpoints(&ctx, names.as_deref(), &clusters[0])? {
                    reporting::bind(endpoint.as_ref(), &ctx.coordinator, &clusters).await?;
                    if cluster.electrical() {
                        read_electrical_measurement_multiplier_divisors(endpoint.as_ref(), false).await?;
                        let presets = [
                            (power, Preset::ActivePower),
                            (voltage, Preset::RmsVoltage),
                            (current, Preset::RmsCurrent),
                        ];
                        for (wanted, preset) in presets {
                            if wanted {
                                optional(
                                    preset.apply(endpoint.as_ref(), None).await,
                                    preset.spec().attribute,
                                )?;
                            }
                        }
                    }
                    if cluster.metering() {
                        read_metering_multiplier_divisor(endpoint.as_ref()).await?;
                        if power && !cluster.electrical() {
                            optional(
                                Preset::InstantaneousDemand.apply(endpoint.as_ref(), None).await,
                                "instantaneousDemand",
                            )?;
                        }
                        if energy {
                            optional(
                                Preset::CurrentSummDelivered.apply(endpoint.as_ref(), None).await,
                                "currentSummDelivered",
                            )?;
                        }
                    }
                }
                Ok(())
            })
        }));
    }
    endpoint_requirements(extend, endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configure::{run_configure, ConfigureContext, RetryPolicy};
    use crate::definition::{Definition, DefinitionBuilder};
    use crate::extend::test_support::decode;
    use serde_json::json;
    use std::sync::Arc;
    use zigbee_core::recording::{RecordingDevice, StackCall};
    use zigbee_core::{BindTarget, Endpoint, MessageType, ZclDevice, ZigbeeDevice};

    fn plug() -> ZigbeeDevice {
        ZigbeeDevice::new([0x61; 8], 0x61)
            .with_model("PLUG-M")
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x0006, 0x0702, 0x0b04], &[]))
    }

    fn definition(args: ElectricityMeterArgs) -> Definition {
        DefinitionBuilder::new("PLUG-M", "Acme", "Metering plug")
            .zigbee_model("PLUG-M")
            .extend(electricity_meter(args))
            .build()
            .unwrap()
    }

    #[test]
    fn test_raw_values_without_factors() {
        let def = definition(ElectricityMeterArgs::default());
        let msg = ZclMessage::attribute_report(
            ELECTRICAL,
            1,
            json!({"activePower": 52, "rmsVoltage": 230, "rmsCurrent": 310}),
        );
        let state = decode(&def, &plug(), &msg, &State::new());
        assert_eq!(
            state,
            json!({"power": 52, "voltage": 230, "current": 310})
                .as_object()
                .cloned()
                .unwrap()
        );
    }

    #[test]
    fn test_disabled_readings_are_not_published() {
        let def = definition(ElectricityMeterArgs::default().without_voltage().without_current());
        let msg = ZclMessage::attribute_report(ELECTRICAL, 1, json!({"activePower": 52, "rmsVoltage": 230}));
        let state = decode(&def, &plug(), &msg, &State::new());
        assert_eq!(state.get("power"), Some(&json!(52)));
        assert!(!state.contains_key("voltage"));
        assert!(!def.exposes.iter().any(|e| e.has_name("current")));
        assert!(def.find_to_zigbee("voltage", None).is_none());
    }

    #[test]
    fn test_factors_in_same_message() {
        let def = definition(ElectricityMeterArgs::default());
        let msg = ZclMessage::new(ELECTRICAL, MessageType::ReadResponse, 1).with_data(json!({
            "acCurrentMultiplier": 1,
            "acCurrentDivisor": 1000,
            "rmsCurrent": 1250
        }));
        let state = decode(&def, &plug(), &msg, &State::new());
        assert_eq!(state.get("current"), Some(&json!(1.25)));
    }

    #[test]
    fn test_energy_from_uint48_pair() {
        let def = definition(ElectricityMeterArgs::default().with_cluster(MeterCluster::Metering));
        let msg = ZclMessage::attribute_report(
            METERING,
            1,
            json!({"multiplier": 1, "divisor": 100, "currentSummDelivered": [1, 0], "instantaneousDemand": 1500}),
        );
        let state = decode(&def, &plug(), &msg, &State::new());
        assert_eq!(state.get("energy"), Some(&json!(42_949_672.96)));
        assert_eq!(state.get("power"), Some(&json!(15)));
        assert!(!def.exposes.iter().any(|e| e.has_name("voltage")));
    }

    #[test]
    fn test_zero_divisor_falls_back_to_raw() {
        let mut store = DeviceStore::default();
        store.put(&factor_key(1, ELECTRICAL, "acPowerMultiplier"), json!(1));
        store.put(&factor_key(1, ELECTRICAL, "acPowerDivisor"), json!(0));
        assert_eq!(factor(&store, 1, ELECTRICAL, "acPowerMultiplier", "acPowerDivisor"), 1.0);
        store.put(&factor_key(1, ELECTRICAL, "acPowerDivisor"), json!(10));
        assert_eq!(factor(&store, 1, ELECTRICAL, "acPowerMultiplier", "acPowerDivisor"), 0.1);
        assert_eq!(factor(&store, 2, ELECTRICAL, "acPowerMultiplier", "acPowerDivisor"), 1.0);
    }

    #[tokio::test]
    async fn test_configure_reads_factors_and_reports() {
        let def = definition(ElectricityMeterArgs::default());
        let device = Arc::new(RecordingDevice::new(plug()));
        let ctx = Arc::new(ConfigureContext::new(
            Arc::clone(&device) as Arc<dyn ZclDevice>,
            BindTarget::Endpoint {
                ieee_address: [0; 8],
                endpoint: 1,
            },
        ));
        let report = run_configure(&def.configure, ctx, &RetryPolicy::default()).await;
        assert!(report.is_success());

        let calls = device.calls();
        let bound: Vec<&str> = calls
            .iter()
            .filter_map(|call| match call {
                StackCall::Bind { cluster, .. } => Some(cluster.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(bound, vec![ELECTRICAL, METERING]);

        let read: Vec<String> = calls
            .iter()
            .filter_map(|call| match call {
                StackCall::Read { attributes, .. } => Some(attributes.join(",")),
                _ => None,
            })
            .collect();
        assert_eq!(
            read,
            vec![
                "acVoltageMultiplier,acVoltageDivisor,acCurrentMultiplier".to_string(),
                "acCurrentDivisor,acPowerMultiplier,acPowerDivisor".to_string(),
                "multiplier,divisor".to_string(),
            ]
        );

        let reported: Vec<String> = calls
            .iter()
            .filter_map(|call| match call {
                StackCall::ConfigureReporting { items, .. } => Some(items[0].attribute.key()),
                _ => None,
            })
            .collect();
        assert_eq!(
            reported,
            vec!["activePower", "rmsVoltage", "rmsCurrent", "currentSummDelivered"]
        );
    }
}
