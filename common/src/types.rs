use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Heat,
}

impl HvacMode {
    pub const ALL: [HvacMode; 2] = [HvacMode::Heat, HvacMode::Off];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heat" => Ok(Self::Heat),
            "off" => Ok(Self::Off),
            _ => Err(ControlError::InvalidMode(value.to_string())),
        }
    }
}

/// What the heater is doing right now, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Heating,
    Idle,
}

/// A state value reported by an external entity (sensor or switch).
///
/// `unavailable` and `unknown` are kept apart from real values so that a
/// reading of `0` is never confused with missing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    Unavailable,
    Unknown,
    Value(String),
}

impl EntityState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            STATE_UNAVAILABLE => Self::Unavailable,
            STATE_UNKNOWN => Self::Unknown,
            other => Self::Value(other.to_string()),
        }
    }

    /// Maps a transport payload to an entity state. An empty payload means the
    /// entity has no state at all.
    pub fn from_payload(payload: &str) -> Option<Self> {
        if payload.trim().is_empty() {
            None
        } else {
            Some(Self::parse(payload))
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::Value(value) if value.eq_ignore_ascii_case(STATE_ON))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unavailable => STATE_UNAVAILABLE,
            Self::Unknown => STATE_UNKNOWN,
            Self::Value(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterCommand {
    TurnOn,
    TurnOff,
}

impl HeaterCommand {
    pub fn payload(self) -> &'static str {
        match self {
            Self::TurnOn => STATE_ON,
            Self::TurnOff => STATE_OFF,
        }
    }

    pub fn service(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }
}

/// Result of feeding one event into the controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reaction {
    /// Actuator command the host has to dispatch.
    pub command: Option<HeaterCommand>,
    /// Controller state changed; publish and persist it.
    pub notify: bool,
    /// Recoverable fault that was absorbed (and already logged).
    pub fault: Option<ControlError>,
}

impl Reaction {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fault(fault: ControlError) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    pub(crate) fn notified(command: Option<HeaterCommand>) -> Self {
        Self {
            command,
            notify: true,
            fault: None,
        }
    }
}

/// State handed to the host for persistence after each mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub mode: HvacMode,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: Option<f64>,
}

/// Previously persisted state as read back from storage.
///
/// `mode` stays a raw string: whatever was stored (including `unavailable`)
/// is coerced by the controller on start.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RestoredState {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(rename = "targetTemperature", default)]
    pub target_temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClimateStatus {
    pub name: String,
    #[serde(rename = "hvacMode")]
    pub hvac_mode: HvacMode,
    #[serde(rename = "hvacAction")]
    pub hvac_action: HvacAction,
    #[serde(rename = "hvacModes")]
    pub hvac_modes: Vec<HvacMode>,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<f64>,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: Option<f64>,
    #[serde(rename = "minTemp")]
    pub min_temp: f64,
    #[serde(rename = "maxTemp")]
    pub max_temp: f64,
    #[serde(rename = "targetTempStep")]
    pub target_temp_step: f64,
    pub precision: f64,
    #[serde(rename = "coldTolerance")]
    pub cold_tolerance: f64,
    #[serde(rename = "hotTolerance")]
    pub hot_tolerance: f64,
    #[serde(rename = "heaterActive")]
    pub heater_active: bool,
    pub heater: String,
    #[serde(rename = "targetSensor")]
    pub target_sensor: String,
}
