use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::HvacMode};

pub const DEFAULT_NAME: &str = "Flexible Thermostat";
pub const DEFAULT_TOLERANCE: f64 = 0.3;
pub const DEFAULT_TARGET_TEMP: f64 = 20.0;
pub const DEFAULT_TARGET_TEMP_STEP: f64 = 0.5;
pub const DEFAULT_MIN_TEMP: f64 = 7.0;
pub const DEFAULT_MAX_TEMP: f64 = 35.0;
pub const PRECISION_TENTHS: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,
    pub heater: String,
    pub target_sensor: String,
    pub target_temp: f64,
    pub cold_tolerance: f64,
    pub hot_tolerance: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub target_temp_step: f64,
    pub initial_hvac_mode: HvacMode,
    /// A target of exactly 0.0 disables control, matching the behaviour of
    /// the climate integration this controller replaces.
    pub zero_target_is_unset: bool,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            heater: "switch.heater".to_string(),
            target_sensor: "sensor.room_temperature".to_string(),
            target_temp: DEFAULT_TARGET_TEMP,
            cold_tolerance: DEFAULT_TOLERANCE,
            hot_tolerance: DEFAULT_TOLERANCE,
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            target_temp_step: DEFAULT_TARGET_TEMP_STEP,
            initial_hvac_mode: HvacMode::Off,
            zero_target_is_unset: true,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        self.cold_tolerance = sanitize_tolerance(self.cold_tolerance);
        self.hot_tolerance = sanitize_tolerance(self.hot_tolerance);

        if !self.target_temp.is_finite() {
            self.target_temp = DEFAULT_TARGET_TEMP;
        }
        if !self.min_temp.is_finite() {
            self.min_temp = DEFAULT_MIN_TEMP;
        }
        if !self.max_temp.is_finite() {
            self.max_temp = DEFAULT_MAX_TEMP;
        }
        if self.min_temp > self.max_temp {
            std::mem::swap(&mut self.min_temp, &mut self.max_temp);
        }
        if !self.target_temp_step.is_finite() || self.target_temp_step <= 0.0 {
            self.target_temp_step = DEFAULT_TARGET_TEMP_STEP;
        }

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = DEFAULT_NAME.to_string();
        }
        self.heater = self.heater.trim().to_string();
        self.target_sensor = self.target_sensor.trim().to_string();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_entity("heater", &self.heater)?;
        validate_entity("target_sensor", &self.target_sensor)
    }

    pub fn target_in_range(&self, value: f64) -> bool {
        (self.min_temp..=self.max_temp).contains(&value)
    }
}

// Entity ids become topic segments, so they must not be subscription filters.
fn validate_entity(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingEntity { field });
    }
    if value.contains(|ch: char| matches!(ch, '+' | '#')) {
        return Err(ConfigError::WildcardEntity {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn sanitize_tolerance(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub topic_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            topic_prefix: "flexstat".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyTopicPrefix);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            network: NetworkConfig::default(),
            http_port: default_http_port(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thermostat.validate()?;
        self.network.validate()
    }
}
