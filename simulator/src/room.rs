/// First-order thermal model of a single heated room.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub temperature: f64,
    pub ambient: f64,
    /// Degrees per second gained while the heater runs.
    pub heat_rate: f64,
    /// Fraction of the gap to ambient lost per second.
    pub loss_rate: f64,
}

impl Default for Room {
    fn default() -> Self {
        Self {
            temperature: 18.5,
            ambient: 12.0,
            heat_rate: 0.01,
            loss_rate: 0.0005,
        }
    }
}

impl Room {
    pub fn step(&mut self, elapsed_secs: f64, heater_on: bool) {
        let loss = (self.temperature - self.ambient) * self.loss_rate * elapsed_secs;
        let gain = if heater_on {
            self.heat_rate * elapsed_secs
        } else {
            0.0
        };
        self.temperature += gain - loss;
    }

    /// Sensor payload with one decimal, as a real probe would report.
    pub fn reading(&self) -> String {
        format!("{:.1}", self.temperature)
    }
}

/// Heater switch whose state changes only when a command is applied,
/// mimicking a device that confirms asynchronously.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    on: bool,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self.on
    }

    /// Applies a command payload and returns the state to echo back, or
    /// `None` for payloads a switch does not understand.
    pub fn apply(&mut self, payload: &str) -> Option<&'static str> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "on" => self.on = true,
            "off" => self.on = false,
            _ => return None,
        }
        Some(self.state())
    }

    pub fn state(self) -> &'static str {
        if self.on {
            "on"
        } else {
            "off"
        }
    }
}
