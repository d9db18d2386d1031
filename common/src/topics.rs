use crate::config::ThermostatConfig;

/// MQTT topic layout for one thermostat, derived from its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub sensor_state: String,
    pub heater_state: String,
    pub heater_command: String,
    pub mode_command: String,
    pub temperature_command: String,
    pub climate_state: String,
}

impl Topics {
    pub fn new(prefix: &str, config: &ThermostatConfig) -> Self {
        let prefix = prefix.trim_matches('/');
        let climate = format!("{prefix}/climate/{}", slugify(&config.name));

        Self {
            sensor_state: format!("{prefix}/{}/state", config.target_sensor),
            heater_state: format!("{prefix}/{}/state", config.heater),
            heater_command: format!("{prefix}/{}/set", config.heater),
            mode_command: format!("{climate}/mode/set"),
            temperature_command: format!("{climate}/temperature/set"),
            climate_state: format!("{climate}/state"),
        }
    }

    pub fn subscriptions(&self) -> [&str; 4] {
        [
            self.sensor_state.as_str(),
            self.heater_state.as_str(),
            self.mode_command.as_str(),
            self.temperature_command.as_str(),
        ]
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "thermostat".to_string()
    } else {
        slug.to_string()
    }
}
