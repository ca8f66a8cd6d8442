//! Sensor extends
//!
//! Each measurement decodes its cluster, publishes a calibrated value, answers
//! `get` requests and configures reporting to the coordinator.

use super::attribute::{endpoint_requirements, from_listed_endpoint, per_endpoint, single};
use super::{target_endpoints, Extend};
use crate::codec::ValueCodec;
use crate::configure::{optional, ConfigureStep};
use crate::definition::{BatteryMeta, DefinitionMeta};
use crate::exposes::{presets, Access, Expose};
use crate::fz::{FzConverter, FzMeta};
use crate::reporting::{Override, Preset};
use crate::state::State;
use crate::tz::{AttributeConverter, KeyPrecedence};
use crate::utils::{
    battery_voltage_to_percentage, calibrate_and_round, number, precision_round, VoltageCurve,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zigbee_core::{ClusterRef, ZclMessage};

/// Raw value a sensor sends when it has no valid reading
const INVALID_MEASUREMENT: i64 = -32768;

fn enabled() -> bool {
    true
}

/// Options shared by the measurement extends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    /// Replacements for the preset's reporting intervals and change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<Override>,
    #[serde(default = "enabled")]
    pub configure_reporting: bool,
}

impl Default for MeasurementArgs {
    fn default() -> Self {
        Self {
            endpoint_names: None,
            reporting: None,
            configure_reporting: true,
        }
    }
}

impl MeasurementArgs {
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_reporting(mut self, overrides: Override) -> Self {
        self.reporting = Some(overrides);
        self
    }

    #[must_use]
    pub fn without_reporting(mut self) -> Self {
        self.configure_reporting = false;
        self
    }
}

type Decode = fn(&ZclMessage, &FzMeta<'_>, &str) -> Option<State>;

/// Static description of one measured quantity
struct Quantity {
    name: &'static str,
    cluster: &'static str,
    attribute: &'static str,
    preset: Preset,
    codec: ValueCodec,
    exposes: fn() -> Vec<Expose>,
    /// Properties that take calibration options
    calibrated: &'static [&'static str],
    decode: Decode,
}

fn measured_value(msg: &ZclMessage) -> Option<i64> {
    let raw = msg.attribute("measuredValue")?.as_i64()?;
    if raw == INVALID_MEASUREMENT {
        tracing::debug!("Ignoring invalid {} reading", msg.cluster);
        return None;
    }
    Some(raw)
}

fn decode_scaled(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str, scale: f64) -> Option<State> {
    let raw = measured_value(msg)?;
    #[allow(clippy::cast_precision_loss)]
    let value = calibrate_and_round(raw as f64 / scale, meta.options, property);
    Some(single(
        meta.postfix_with_endpoint_name(property, msg),
        number(value),
    ))
}

fn decode_temperature(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str) -> Option<State> {
    decode_scaled(msg, meta, property, 100.0)
}

fn decode_humidity(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str) -> Option<State> {
    decode_scaled(msg, meta, property, 100.0)
}

fn decode_pressure(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str) -> Option<State> {
    decode_scaled(msg, meta, property, 1.0)
}

/// Raw value plus the logarithmic lux conversion
fn decode_illuminance(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str) -> Option<State> {
    let raw = measured_value(msg)?;
    #[allow(clippy::cast_precision_loss)]
    let raw = raw as f64;
    let lux = if raw > 0.0 {
        10f64.powf((raw - 1.0) / 10_000.0)
    } else {
        0.0
    };
    let mut state = single(
        meta.postfix_with_endpoint_name(property, msg),
        number(calibrate_and_round(raw, meta.options, "illuminance")),
    );
    state.insert(
        meta.postfix_with_endpoint_name("illuminance_lux", msg),
        number(calibrate_and_round(lux, meta.options, "illuminance_lux")),
    );
    Some(state)
}

fn decode_occupancy(msg: &ZclMessage, meta: &FzMeta<'_>, property: &str) -> Option<State> {
    let bits = msg.attribute("occupancy")?.as_u64()?;
    Some(single(
        meta.postfix_with_endpoint_name(property, msg),
        Value::from(bits & 1 == 1),
    ))
}

fn calibration_options(properties: &[&str]) -> Vec<Expose> {
    properties
        .iter()
        .flat_map(|property| {
            [
                Expose::numeric(&format!("{property}_calibration"), Access::SET)
                    .with_description(&format!("Calibrates the {property} value")),
                Expose::numeric(&format!("{property}_precision"), Access::SET)
                    .with_value_min(0.0)
                    .with_value_max(3.0)
                    .with_description(&format!("Number of digits after decimal point for {property}")),
            ]
        })
        .collect()
}

fn measurement(quantity: Quantity, args: MeasurementArgs) -> Extend {
    let endpoints = args.endpoint_names.as_deref();
    let filter = args.endpoint_names.clone();
    let decode = quantity.decode;
    let property = quantity.name;
    let mut inbound = FzConverter::new(
        quantity.name,
        quantity.cluster,
        &FzConverter::attribute_types(),
        move |msg, meta| {
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            decode(msg, meta, property)
        },
    );
    for option in calibration_options(quantity.calibrated) {
        inbound = inbound.with_option(option);
    }

    let mut extend = Extend::new(quantity.name).with_from_zigbee(inbound);

    let getter = AttributeConverter::new(
        quantity.name,
        quantity.cluster,
        quantity.attribute,
        quantity.codec.clone(),
    )
    .read_only(true);
    extend = match endpoints {
        None => extend.with_to_zigbee(getter),
        Some(names) => names.iter().fold(extend, |extend, endpoint| {
            extend.with_to_zigbee(
                getter
                    .clone()
                    .for_endpoints(&[endpoint.as_str()])
                    .with_precedence(KeyPrecedence::Cooperative),
            )
        }),
    };
    for expose in (quantity.exposes)() {
        extend = per_endpoint(extend, expose, endpoints);
    }

    if args.configure_reporting {
        let names = args.endpoint_names.clone();
        let overrides = args.reporting;
        let preset = quantity.preset;
        let cluster = quantity.cluster;
        extend = extend.with_configure(ConfigureStep::new(
            &format!("{}_reporting", quantity.name),
            move |ctx| {
                let names = names.clone();
                Box::pin(async move {
                    let cluster = ClusterRef::from(cluster);
                    for endpoint in target_endpoints(&ctx, names.as_deref(), &cluster)? {
                        endpoint.bind(&cluster, &ctx.coordinator).await?;
                        preset.apply(endpoint.as_ref(), overrides.as_ref()).await?;
                    }
                    Ok(())
                })
            },
        ));
    }
    endpoint_requirements(extend, endpoints)
}

#[must_use]
pub fn temperature(args: MeasurementArgs) -> Extend {
    measurement(
        Quantity {
            name: "temperature",
            cluster: "msTemperatureMeasurement",
            attribute: "measuredValue",
            preset: Preset::Temperature,
            codec: ValueCodec::scaled(100.0, 2),
            exposes: || vec![presets::temperature()],
            calibrated: &["temperature"],
            decode: decode_temperature,
        },
        args,
    )
}

#[must_use]
pub fn humidity(args: MeasurementArgs) -> Extend {
    measurement(
        Quantity {
            name: "humidity",
            cluster: "msRelativeHumidity",
            attribute: "measuredValue",
            preset: Preset::Humidity,
            codec: ValueCodec::scaled(100.0, 2),
            exposes: || vec![presets::humidity()],
            calibrated: &["humidity"],
            decode: decode_humidity,
        },
        args,
    )
}

#[must_use]
pub fn pressure(args: MeasurementArgs) -> Extend {
    measurement(
        Quantity {
            name: "pressure",
            cluster: "msPressureMeasurement",
            attribute: "measuredValue",
            preset: Preset::Pressure,
            codec: ValueCodec::numeric(),
            exposes: || vec![presets::pressure()],
            calibrated: &["pressure"],
            decode: decode_pressure,
        },
        args,
    )
}

/// Publishes both the raw `illuminance` and `illuminance_lux`
#[must_use]
pub fn illuminance(args: MeasurementArgs) -> Extend {
    measurement(
        Quantity {
            name: "illuminance",
            cluster: "msIlluminanceMeasurement",
            attribute: "measuredValue",
            preset: Preset::Illuminance,
            codec: ValueCodec::numeric(),
            exposes: || vec![presets::illuminance(), presets::illuminance_lux()],
            calibrated: &["illuminance", "illuminance_lux"],
            decode: decode_illuminance,
        },
        args,
    )
}

#[must_use]
pub fn occupancy(args: MeasurementArgs) -> Extend {
    measurement(
        Quantity {
            name: "occupancy",
            cluster: "msOccupancySensing",
            attribute: "occupancy",
            preset: Preset::Occupancy,
            codec: ValueCodec::numeric(),
            exposes: || vec![presets::occupancy()],
            calibrated: &[],
            decode: decode_occupancy,
        },
        args,
    )
}

/// Options of [`battery`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryArgs {
    /// Publish `battery` from batteryPercentageRemaining
    #[serde(default = "enabled")]
    pub percentage: bool,
    /// Publish `voltage` from batteryVoltage
    #[serde(default)]
    pub voltage: bool,
    /// Publish `battery_low` from batteryAlarmState
    #[serde(default)]
    pub alarm: bool,
    #[serde(default)]
    pub dont_divide_percentage: bool,
    /// Derive `battery` from the voltage with this curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_to_percentage: Option<VoltageCurve>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_reporting: Option<Override>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_reporting: Option<Override>,
    #[serde(default = "enabled")]
    pub configure_reporting: bool,
}

impl Default for BatteryArgs {
    fn default() -> Self {
        Self {
            percentage: true,
            voltage: false,
            alarm: false,
            dont_divide_percentage: false,
            voltage_to_percentage: None,
            percentage_reporting: None,
            voltage_reporting: None,
            configure_reporting: true,
        }
    }
}

impl BatteryArgs {
    #[must_use]
    pub fn with_voltage(mut self) -> Self {
        self.voltage = true;
        self
    }

    #[must_use]
    pub fn with_alarm(mut self) -> Self {
        self.alarm = true;
        self
    }

    #[must_use]
    pub fn with_voltage_to_percentage(mut self, curve: VoltageCurve) -> Self {
        self.voltage = true;
        self.voltage_to_percentage = Some(curve);
        self
    }

    #[must_use]
    pub fn dont_divide_percentage(mut self) -> Self {
        self.dont_divide_percentage = true;
        self
    }
}

/// Decode genPowerCfg using the definition's battery hints
fn decode_battery(msg: &ZclMessage, meta: &FzMeta<'_>) -> Option<State> {
    let hints = meta.definition.meta.battery.clone().unwrap_or_default();
    let curve = hints.voltage_to_percentage;
    let mut state = State::new();

    if let Some(percentage) = msg.attribute_f64("batteryPercentageRemaining") {
        if percentage < 255.0 && curve.is_none() {
            let percentage = if hints.dont_divide_percentage.unwrap_or(false) {
                percentage
            } else {
                percentage / 2.0
            };
            state.insert("battery".to_string(), number(precision_round(percentage, 2)));
        }
    }

    if let Some(voltage) = msg.attribute_f64("batteryVoltage") {
        if voltage < 255.0 {
            let millivolts = voltage * 100.0;
            state.insert("voltage".to_string(), number(millivolts));
            if let Some(curve) = curve {
                state.insert(
                    "battery".to_string(),
                    number(battery_voltage_to_percentage(millivolts, curve)),
                );
            }
        }
    }

    if let Some(alarm) = msg.attribute("batteryAlarmState").and_then(Value::as_u64) {
        let low = alarm & (1 << 0 | 1 << 9 | 1 << 19) != 0;
        state.insert("battery_low".to_string(), Value::from(low));
    }

    (!state.is_empty()).then_some(state)
}

#[must_use]
pub fn battery(args: BatteryArgs) -> Extend {
    let inbound = FzConverter::new(
        "battery",
        "genPowerCfg",
        &FzConverter::attribute_types(),
        |msg, meta| decode_battery(msg, meta),
    );

    let mut extend = Extend::new("battery")
        .with_from_zigbee(inbound)
        .with_meta(DefinitionMeta {
            battery: Some(BatteryMeta {
                voltage_to_percentage: args.voltage_to_percentage,
                dont_divide_percentage: args.dont_divide_percentage.then_some(true),
            }),
            ..DefinitionMeta::default()
        });

    if args.percentage || args.voltage_to_percentage.is_some() {
        let getter = if args.voltage_to_percentage.is_some() {
            AttributeConverter::new("battery", "genPowerCfg", "batteryVoltage", ValueCodec::numeric())
        } else {
            AttributeConverter::new(
                "battery",
                "genPowerCfg",
                "batteryPercentageRemaining",
                ValueCodec::numeric(),
            )
        };
        extend = extend
            .with_to_zigbee(getter.read_only(true))
            .with_expose(presets::battery());
    }
    if args.voltage {
        extend = extend
            .with_to_zigbee(
                AttributeConverter::new("voltage", "genPowerCfg", "batteryVoltage", ValueCodec::numeric())
                    .read_only(true),
            )
            .with_expose(presets::battery_voltage());
    }
    if args.alarm {
        extend = extend.with_expose(presets::battery_low());
    }

    if args.configure_reporting {
        let percentage = args.percentage && args.voltage_to_percentage.is_none();
        let voltage = args.voltage;
        let alarm = args.alarm;
        let percentage_reporting = args.percentage_reporting;
        let voltage_reporting = args.voltage_reporting;
        extend = extend.with_configure(ConfigureStep::new("battery_reporting", move |ctx| {
            Box::pin(async move {
                let cluster = ClusterRef::from("genPowerCfg");
                for endpoint in target_endpoints(&ctx, None, &cluster)? {
                    optional(
                        endpoint.bind(&cluster, &ctx.coordinator).await,
                        "genPowerCfg bind",
                    )?;
                    if percentage {
                        optional(
                            Preset::BatteryPercentageRemaining
                                .apply(endpoint.as_ref(), percentage_reporting.as_ref())
                                .await,
                            "batteryPercentageRemaining reporting",
                        )?;
                    }
                    if voltage {
                        optional(
                            Preset::BatteryVoltage
                                .apply(endpoint.as_ref(), voltage_reporting.as_ref())
                                .await,
                            "batteryVoltage reporting",
                        )?;
                    }
                    if alarm {
                        optional(
                            Preset::BatteryAlarmState.apply(endpoint.as_ref(), None).await,
                            "batteryAlarmState reporting",
                        )?;
                    }
                }
                Ok(())
            })
        }));
    }
    extend
}
