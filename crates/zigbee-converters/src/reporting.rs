//! Attribute reporting configuration
//!
//! [`payload`] builds reporting entries; it performs no validation and no
//! network calls. The presets bundle the cluster, attribute and default
//! intervals used for common measurements and issue the calls on an endpoint.

use serde::{Deserialize, Serialize};
use zigbee_core::{
    AttributeRef, BindTarget, ClusterRef, ReportableChange, ReportingConfig, StackError,
    ZclEndpoint, ZclOptions,
};

/// Reporting intervals in seconds
pub mod interval {
    pub const SECONDS_5: u16 = 5;
    pub const SECONDS_10: u16 = 10;
    pub const MINUTE: u16 = 60;
    pub const MINUTES_5: u16 = 300;
    pub const MINUTES_10: u16 = 600;
    pub const MINUTES_15: u16 = 900;
    pub const MINUTES_30: u16 = 1800;
    pub const HOUR: u16 = 3600;
    pub const MAX: u16 = 65000;
}

/// Per-call replacements for the default min/max/change
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Override {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ReportableChange>,
}

impl Override {
    #[must_use]
    pub fn change(change: impl Into<ReportableChange>) -> Self {
        Self {
            change: Some(change.into()),
            ..Self::default()
        }
    }
}

/// Build the reporting entries for one attribute
#[must_use]
pub fn payload(
    attribute: impl Into<AttributeRef>,
    min: u16,
    max: u16,
    change: impl Into<ReportableChange>,
    overrides: Option<&Override>,
) -> Vec<ReportingConfig> {
    let mut entry = ReportingConfig {
        attribute: attribute.into(),
        minimum_report_interval: min,
        maximum_report_interval: max,
        reportable_change: change.into(),
    };
    if let Some(overrides) = overrides {
        if let Some(min) = overrides.min {
            entry.minimum_report_interval = min;
        }
        if let Some(max) = overrides.max {
            entry.maximum_report_interval = max;
        }
        if let Some(change) = overrides.change {
            entry.reportable_change = change;
        }
    }
    vec![entry]
}

/// Bind each cluster of `endpoint` to `target`
pub async fn bind(
    endpoint: &dyn ZclEndpoint,
    target: &BindTarget,
    clusters: &[ClusterRef],
) -> Result<(), StackError> {
    for cluster in clusters {
        endpoint.bind(cluster, target).await?;
    }
    Ok(())
}

/// Read the electrical measurement multipliers and divisors.
///
/// Split into chunks; some devices fail to answer larger reads.
pub async fn read_electrical_measurement_multiplier_divisors(
    endpoint: &dyn ZclEndpoint,
    read_frequency_attributes: bool,
) -> Result<(), StackError> {
    let cluster = ClusterRef::from("haElectricalMeasurement");
    let options = ZclOptions::default();
    let chunks: &[&[&str]] = &[
        &["acVoltageMultiplier", "acVoltageDivisor", "acCurrentMultiplier"],
        &["acCurrentDivisor", "acPowerMultiplier", "acPowerDivisor"],
    ];
    for chunk in chunks {
        let attributes: Vec<AttributeRef> = chunk.iter().map(|a| AttributeRef::from(*a)).collect();
        endpoint.read(&cluster, &attributes, &options).await?;
    }
    if read_frequency_attributes {
        endpoint
            .read(
                &cluster,
                &["acFrequencyDivisor".into(), "acFrequencyMultiplier".into()],
                &options,
            )
            .await?;
    }
    Ok(())
}

pub async fn read_metering_multiplier_divisor(endpoint: &dyn ZclEndpoint) -> Result<(), StackError> {
    endpoint
        .read(
            &"seMetering".into(),
            &["multiplier".into(), "divisor".into()],
            &ZclOptions::default(),
        )
        .await?;
    Ok(())
}

/// Named reporting preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    OnOff,
    Temperature,
    Humidity,
    Pressure,
    Illuminance,
    Occupancy,
    BatteryPercentageRemaining,
    BatteryVoltage,
    BatteryAlarmState,
    ThermostatKeypadLockMode,
    ActivePower,
    RmsVoltage,
    RmsCurrent,
    InstantaneousDemand,
    CurrentSummDelivered,
}

/// Cluster, attribute and defaults of a preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetSpec {
    pub cluster: &'static str,
    pub attribute: &'static str,
    pub min: u16,
    pub max: u16,
    pub change: ReportableChange,
    /// Read the attribute once after configuring
    pub read_after: bool,
}

impl Preset {
    #[must_use]
    pub fn spec(self) -> PresetSpec {
        use interval::{HOUR, MAX};
        let (cluster, attribute, min, max, change, read_after) = match self {
            Self::OnOff => ("genOnOff", "onOff", 0, HOUR, ReportableChange::Analog(0), false),
            Self::Temperature => ("msTemperatureMeasurement", "measuredValue", 10, HOUR, ReportableChange::Analog(100), false),
            Self::Humidity => ("msRelativeHumidity", "measuredValue", 10, HOUR, ReportableChange::Analog(100), false),
            Self::Pressure => ("msPressureMeasurement", "measuredValue", 10, HOUR, ReportableChange::Analog(5), false),
            Self::Illuminance => ("msIlluminanceMeasurement", "measuredValue", 10, HOUR, ReportableChange::Analog(5), false),
            Self::Occupancy => ("msOccupancySensing", "occupancy", 0, HOUR, ReportableChange::Analog(0), false),
            Self::BatteryPercentageRemaining => ("genPowerCfg", "batteryPercentageRemaining", HOUR, MAX, ReportableChange::Analog(0), true),
            Self::BatteryVoltage => ("genPowerCfg", "batteryVoltage", HOUR, MAX, ReportableChange::Analog(0), true),
            Self::BatteryAlarmState => ("genPowerCfg", "batteryAlarmState", HOUR, MAX, ReportableChange::Analog(0), true),
            Self::ThermostatKeypadLockMode => ("hvacUserInterfaceCfg", "keypadLockout", 10, HOUR, ReportableChange::Discrete, false),
            Self::ActivePower => ("haElectricalMeasurement", "activePower", 5, HOUR, ReportableChange::Analog(1), false),
            Self::RmsVoltage => ("haElectricalMeasurement", "rmsVoltage", 5, HOUR, ReportableChange::Analog(1), false),
            Self::RmsCurrent => ("haElectricalMeasurement", "rmsCurrent", 5, HOUR, ReportableChange::Analog(1), false),
            Self::InstantaneousDemand => ("seMetering", "instantaneousDemand", 5, HOUR, ReportableChange::Analog(1), false),
            Self::CurrentSummDelivered => ("seMetering", "currentSummDelivered", 5, HOUR, ReportableChange::Uint48([1, 1]), false),
        };
        PresetSpec {
            cluster,
            attribute,
            min,
            max,
            change,
            read_after,
        }
    }

    /// Reporting entries with `overrides` applied
    #[must_use]
    pub fn payload(self, overrides: Option<&Override>) -> Vec<ReportingConfig> {
        let spec = self.spec();
        payload(spec.attribute, spec.min, spec.max, spec.change, overrides)
    }

    /// Configure reporting on `endpoint`, then read the attribute if the preset asks for it
    pub async fn apply(
        self,
        endpoint: &dyn ZclEndpoint,
        overrides: Option<&Override>,
    ) -> Result<(), StackError> {
        let spec = self.spec();
        let cluster = ClusterRef::from(spec.cluster);
        let options = ZclOptions::default();
        endpoint
            .configure_reporting(&cluster, &self.payload(overrides), &options)
            .await?;
        if spec.read_after {
            endpoint
                .read(&cluster, &[AttributeRef::from(spec.attribute)], &options)
                .await?;
        }
        Ok(())
    }
}
