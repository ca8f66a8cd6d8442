//! Numeric helpers shared by converters

use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Round `value` to `precision` decimal places
#[must_use]
pub fn precision_round(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Clamp `value` into `[min, max]` and express it as a whole percentage
#[must_use]
pub fn to_percentage(value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    ((clamped - min) / (max - min) * 100.0).round()
}

/// Map `value` linearly from one range onto another
#[must_use]
pub fn map_number_range(
    value: f64,
    from_low: f64,
    from_high: f64,
    to_low: f64,
    to_high: f64,
    precision: u32,
) -> f64 {
    let mapped = to_low + (value - from_low) * (to_high - to_low) / (from_high - from_low);
    precision_round(mapped, precision)
}

/// Battery discharge curve used to turn a voltage into a percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoltageCurve {
    /// Named non-linear curve
    Named(NamedCurve),
    /// Linear between two millivolt readings
    Linear { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedCurve {
    /// CR2032 style cell, empty at 2.1V
    #[serde(rename = "3V_2100")]
    Cr2032,
    /// Two AAA cells
    #[serde(rename = "3V_1500_2800")]
    TwoAaa,
}

/// Convert a battery voltage in millivolts to a percentage
#[must_use]
pub fn battery_voltage_to_percentage(voltage: f64, curve: VoltageCurve) -> f64 {
    match curve {
        VoltageCurve::Named(NamedCurve::Cr2032) => {
            let percentage = if voltage < 2100.0 {
                0.0
            } else if voltage < 2440.0 {
                6.0 - ((2440.0 - voltage) * 6.0) / 340.0
            } else if voltage < 2740.0 {
                18.0 - ((2740.0 - voltage) * 12.0) / 300.0
            } else if voltage < 2900.0 {
                42.0 - ((2900.0 - voltage) * 24.0) / 160.0
            } else if voltage < 3000.0 {
                100.0 - ((3000.0 - voltage) * 58.0) / 100.0
            } else {
                100.0
            };
            percentage.round()
        }
        VoltageCurve::Named(NamedCurve::TwoAaa) => {
            (235.0 - 370_000.0 / (voltage + 1.0)).clamp(0.0, 100.0).round()
        }
        VoltageCurve::Linear { min, max } => to_percentage(voltage, min, max),
    }
}

/// Default number of decimals for well known measurement properties
#[must_use]
pub fn default_precision(property: &str) -> u32 {
    match property {
        "temperature" | "humidity" | "power" | "current" | "voltage" | "energy"
        | "soil_moisture" => 2,
        "pressure" => 1,
        _ => 0,
    }
}

/// Whether a property's calibration is a relative percentage instead of an offset
fn is_percentual(property: &str) -> bool {
    ["current", "energy", "voltage", "power", "illuminance"]
        .iter()
        .any(|prefix| property.starts_with(prefix))
}

/// Apply the `<property>_calibration` and `<property>_precision` user options
#[must_use]
pub fn calibrate_and_round(value: f64, options: &State, property: &str) -> f64 {
    let offset = options
        .get(&format!("{property}_calibration"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let calibrated = if is_percentual(property) {
        value + value * offset / 100.0
    } else {
        value + offset
    };

    let precision = options
        .get(&format!("{property}_precision"))
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or_else(|| default_precision(property));
    precision_round(calibrated, precision)
}

/// Human readable label from a property name: `child_lock` becomes `Child lock`
#[must_use]
pub fn label_from_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reverse lookup: the name mapped to `value`
#[must_use]
pub fn lookup_name<'a>(lookup: &'a [(String, Value)], value: &Value) -> Option<&'a str> {
    lookup
        .iter()
        .find(|(_, v)| values_equal(v, value))
        .map(|(name, _)| name.as_str())
}

/// Forward lookup: the value mapped to `name`
#[must_use]
pub fn lookup_value<'a>(lookup: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    lookup.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// Equality that treats `1` and `1.0` as the same number
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

/// Numeric JSON value, integral when possible
#[must_use]
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precision_round() {
        assert_eq!(precision_round(21.456, 2), 21.46);
        assert_eq!(precision_round(21.5, 0), 22.0);
        assert_eq!(precision_round(1013.25, 1), 1013.3);
    }

    #[test]
    fn test_to_percentage_clamps() {
        assert_eq!(to_percentage(2750.0, 2500.0, 3000.0), 50.0);
        assert_eq!(to_percentage(3300.0, 2500.0, 3000.0), 100.0);
        assert_eq!(to_percentage(1000.0, 2500.0, 3000.0), 0.0);
    }

    #[test]
    fn test_map_number_range() {
        assert_eq!(map_number_range(127.0, 0.0, 254.0, 0.0, 100.0, 0), 50.0);
    }

    #[test]
    fn test_battery_voltage_curves() {
        let cr2032 = VoltageCurve::Named(NamedCurve::Cr2032);
        assert_eq!(battery_voltage_to_percentage(3100.0, cr2032), 100.0);
        assert_eq!(battery_voltage_to_percentage(2000.0, cr2032), 0.0);
        assert_eq!(battery_voltage_to_percentage(2950.0, cr2032), 71.0);

        let linear = VoltageCurve::Linear {
            min: 2500.0,
            max: 3000.0,
        };
        assert_eq!(battery_voltage_to_percentage(2750.0, linear), 50.0);
    }

    #[test]
    fn test_voltage_curve_deserialize() {
        let named: VoltageCurve = serde_json::from_value(json!("3V_2100")).unwrap();
        assert_eq!(named, VoltageCurve::Named(NamedCurve::Cr2032));
        let linear: VoltageCurve = serde_json::from_value(json!({"min": 1900, "max": 3000})).unwrap();
        assert_eq!(
            linear,
            VoltageCurve::Linear {
                min: 1900.0,
                max: 3000.0
            }
        );
    }

    #[test]
    fn test_calibrate_and_round() {
        let mut options = State::new();
        assert_eq!(calibrate_and_round(21.456, &options, "temperature"), 21.46);

        options.insert("temperature_calibration".to_string(), json!(-1.5));
        options.insert("temperature_precision".to_string(), json!(1));
        assert_eq!(calibrate_and_round(21.456, &options, "temperature"), 20.0);

        options.insert("illuminance_calibration".to_string(), json!(10));
        assert_eq!(calibrate_and_round(100.0, &options, "illuminance"), 110.0);
    }

    #[test]
    fn test_label_from_name() {
        assert_eq!(label_from_name("child_lock"), "Child lock");
        assert_eq!(label_from_name(""), "");
    }

    #[test]
    fn test_lookup() {
        let lookup = vec![
            ("low".to_string(), json!(0)),
            ("high".to_string(), json!(1)),
        ];
        assert_eq!(lookup_name(&lookup, &json!(1.0)), Some("high"));
        assert_eq!(lookup_value(&lookup, "low"), Some(&json!(0)));
        assert_eq!(lookup_name(&lookup, &json!(7)), None);
    }

    #[test]
    fn test_number_prefers_integers() {
        assert_eq!(number(21.0), json!(21));
        assert_eq!(number(21.5), json!(21.5));
    }
}
