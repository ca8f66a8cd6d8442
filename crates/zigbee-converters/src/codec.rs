//! Attribute value codecs
//!
//! A codec is the per-attribute contract between raw ZCL values and exposed
//! state: a scale factor and precision for numbers, an on/off pair for
//! binaries, a name table for enums, or a fixed-length hex encoding for
//! octet-string configuration blobs.

use crate::error::ConvertError;
use crate::utils::{lookup_name, lookup_value, number, precision_round, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum ValueCodec {
    /// `decoded = raw / scale`, rounded to `precision` decimals
    Numeric {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// `(state value, raw value)` pairs for on and off
    Binary { on: (Value, Value), off: (Value, Value) },
    /// Named raw values
    Lookup { values: Vec<(String, Value)> },
    /// Octet string written from a hex string of exactly `length` bytes
    HexBytes { length: usize },
}

impl ValueCodec {
    /// Plain number, no scaling
    #[must_use]
    pub fn numeric() -> Self {
        Self::Numeric {
            scale: None,
            precision: None,
            min: None,
            max: None,
        }
    }

    /// Number stored in `1/scale` units
    #[must_use]
    pub fn scaled(scale: f64, precision: u32) -> Self {
        Self::Numeric {
            scale: Some(scale),
            precision: Some(precision),
            min: None,
            max: None,
        }
    }

    /// Decode a raw attribute value; `None` when the raw value does not fit
    #[must_use]
    pub fn decode(&self, raw: &Value) -> Option<Value> {
        match self {
            Self::Numeric {
                scale, precision, ..
            } => {
                let mut value = raw.as_f64()?;
                if let Some(scale) = scale {
                    value /= scale;
                }
                if let Some(precision) = precision {
                    value = precision_round(value, *precision);
                }
                Some(number(value))
            }
            Self::Binary { on, off } => {
                if values_equal(raw, &on.1) {
                    Some(on.0.clone())
                } else {
                    Some(off.0.clone())
                }
            }
            Self::Lookup { values } => {
                lookup_name(values, raw).map(|name| Value::String(name.to_string()))
            }
            Self::HexBytes { .. } => match raw {
                Value::String(s) => Some(Value::String(s.to_lowercase())),
                Value::Array(bytes) => {
                    let hex: Option<String> = bytes
                        .iter()
                        .map(|b| b.as_u64().map(|b| format!("{b:02x}")))
                        .collect();
                    hex.map(Value::String)
                }
                _ => None,
            },
        }
    }

    /// Encode a requested state value into the raw value to write.
    ///
    /// Fails before any stack call when the value is outside the domain.
    pub fn encode(&self, key: &str, value: &Value) -> Result<Value, ConvertError> {
        match self {
            Self::Numeric {
                scale, min, max, ..
            } => {
                let requested = value
                    .as_f64()
                    .ok_or_else(|| ConvertError::invalid(key, format!("expected a number, got {value}")))?;
                if let Some(min) = min {
                    if requested < *min {
                        return Err(ConvertError::invalid(key, format!("{requested} is below {min}")));
                    }
                }
                if let Some(max) = max {
                    if requested > *max {
                        return Err(ConvertError::invalid(key, format!("{requested} is above {max}")));
                    }
                }
                Ok(match scale {
                    Some(scale) => number((requested * scale).round()),
                    None => value.clone(),
                })
            }
            Self::Binary { on, off } => {
                if values_equal(value, &on.0) {
                    Ok(on.1.clone())
                } else if values_equal(value, &off.0) {
                    Ok(off.1.clone())
                } else {
                    Err(ConvertError::invalid(
                        key,
                        format!("expected {} or {}, got {}", on.0, off.0, value),
                    ))
                }
            }
            Self::Lookup { values } => {
                let name = value
                    .as_str()
                    .ok_or_else(|| ConvertError::invalid(key, format!("expected a string, got {value}")))?;
                lookup_value(values, name).cloned().ok_or_else(|| {
                    let allowed: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
                    ConvertError::invalid(key, format!("'{name}' is not one of {allowed:?}"))
                })
            }
            Self::HexBytes { length } => {
                let hex = value
                    .as_str()
                    .ok_or_else(|| ConvertError::malformed(key, "expected a hex string"))?
                    .trim();
                if hex.len() != length * 2 {
                    return Err(ConvertError::malformed(
                        key,
                        format!("expected {} hex digits, got {}", length * 2, hex.len()),
                    ));
                }
                let bytes = (0..hex.len())
                    .step_by(2)
                    .map(|i| {
                        hex.get(i..i + 2)
                            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                            .map(Value::from)
                    })
                    .collect::<Option<Vec<Value>>>()
                    .ok_or_else(|| ConvertError::malformed(key, format!("'{hex}' is not hex")))?;
                Ok(Value::Array(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scaled_numeric() {
        let codec = ValueCodec::scaled(100.0, 2);
        assert_eq!(codec.decode(&json!(2150)), Some(json!(21.5)));
        assert_eq!(codec.decode(&json!("warm")), None);
        assert_eq!(codec.encode("setpoint", &json!(21.5)).unwrap(), json!(2150));
        assert!(matches!(
            codec.encode("setpoint", &json!("hot")),
            Err(ConvertError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_numeric_bounds() {
        let codec = ValueCodec::Numeric {
            scale: None,
            precision: None,
            min: Some(0.0),
            max: Some(30.0),
        };
        assert_eq!(codec.encode("timeout", &json!(10)).unwrap(), json!(10));
        assert!(codec.encode("timeout", &json!(31)).is_err());
    }

    #[test]
    fn test_binary() {
        let codec = ValueCodec::Binary {
            on: (json!("LOCK"), json!(1)),
            off: (json!("UNLOCK"), json!(0)),
        };
        assert_eq!(codec.decode(&json!(1)), Some(json!("LOCK")));
        assert_eq!(codec.decode(&json!(0)), Some(json!("UNLOCK")));
        assert_eq!(codec.encode("child_lock", &json!("LOCK")).unwrap(), json!(1));
        assert!(codec.encode("child_lock", &json!("OPEN")).is_err());
    }

    #[test]
    fn test_lookup() {
        let codec = ValueCodec::Lookup {
            values: vec![("off".to_string(), json!(0)), ("on".to_string(), json!(1))],
        };
        assert_eq!(codec.decode(&json!(1)), Some(json!("on")));
        assert_eq!(codec.decode(&json!(9)), None);
        assert_eq!(codec.encode("mode", &json!("off")).unwrap(), json!(0));
    }

    #[test]
    fn test_hex_bytes_rejects_wrong_length() {
        let codec = ValueCodec::HexBytes { length: 4 };
        assert_eq!(
            codec.encode("schedule", &json!("0a0B0c0d")).unwrap(),
            json!([10, 11, 12, 13])
        );
        assert!(matches!(
            codec.encode("schedule", &json!("0a0b0c")),
            Err(ConvertError::MalformedPayload { .. })
        ));
        assert!(matches!(
            codec.encode("schedule", &json!("zz0b0c0d")),
            Err(ConvertError::MalformedPayload { .. })
        ));
        assert_eq!(codec.decode(&json!([10, 255])), Some(json!("0aff")));
    }
}
