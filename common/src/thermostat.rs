use tracing::{debug, error, info, warn};

use crate::{
    config::{ThermostatConfig, PRECISION_TENTHS},
    error::ControlError,
    types::{
        ClimateStatus, EntityState, HeaterCommand, HvacAction, HvacMode, Reaction, RestoredState,
        Snapshot,
    },
};

/// Single-stage heat-only hysteresis controller.
///
/// The controller owns no I/O. Every event returns a [`Reaction`] holding at
/// most one heater command; the host dispatches it and later reports the
/// heater's real state back through [`on_actuator_update`].
///
/// [`on_actuator_update`]: ThermostatController::on_actuator_update
#[derive(Debug, Clone)]
pub struct ThermostatController {
    config: ThermostatConfig,

    mode: HvacMode,
    current_temp: Option<f64>,
    target_temp: Option<f64>,

    // Written only from observed heater state, never from our own commands.
    heater_active: bool,
}

impl ThermostatController {
    pub fn new(mut config: ThermostatConfig) -> Self {
        config.sanitize();
        Self {
            mode: config.initial_hvac_mode,
            current_temp: None,
            target_temp: Some(config.target_temp),
            heater_active: false,
            config,
        }
    }

    /// Applies the state persisted at the previous shutdown.
    pub fn on_start(&mut self, restored: Option<&RestoredState>) {
        let Some(restored) = restored else {
            info!(mode = %self.mode, "no previous state to restore");
            return;
        };

        if let Some(target) = restored.target_temperature {
            if target.is_finite() {
                self.target_temp = Some(target);
            } else {
                warn!("ignoring restored target temperature {target}");
            }
        }

        if let Some(raw) = restored.mode.as_deref().filter(|raw| !raw.is_empty()) {
            self.mode = match EntityState::parse(raw) {
                EntityState::Unavailable | EntityState::Unknown => HvacMode::Off,
                EntityState::Value(value) => value.parse().unwrap_or_else(|err| {
                    warn!("restored state: {err}; falling back to off");
                    HvacMode::Off
                }),
            };
        }

        info!(
            mode = %self.mode,
            target = ?self.target_temp,
            "restored thermostat state"
        );
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            mode: self.mode,
            target_temperature: self.target_temp,
        }
    }

    pub fn mode(&self) -> HvacMode {
        self.mode
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temp
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.target_temp
    }

    pub fn is_heater_active(&self) -> bool {
        self.heater_active
    }

    pub fn hvac_action(&self) -> HvacAction {
        if self.mode == HvacMode::Off {
            HvacAction::Off
        } else if self.heater_active {
            HvacAction::Heating
        } else {
            HvacAction::Idle
        }
    }

    pub fn on_sensor_update(&mut self, new_state: Option<&EntityState>) -> Reaction {
        let Some(EntityState::Value(raw)) = new_state else {
            return Reaction::none();
        };

        match parse_temperature(raw) {
            Ok(temp) => {
                self.current_temp = Some(temp);
                Reaction::notified(self.reconcile())
            }
            Err(err) => {
                error!("{err}");
                Reaction::fault(err)
            }
        }
    }

    pub fn on_actuator_update(&mut self, new_state: Option<&EntityState>) -> Reaction {
        let Some(state) = new_state else {
            return Reaction::none();
        };

        self.heater_active = state.is_on();
        debug!(heater_state = state.as_str(), "heater state observed");
        Reaction::notified(None)
    }

    pub fn set_mode(&mut self, requested: &str) -> Reaction {
        match requested.parse::<HvacMode>() {
            Ok(mode) => self.set_hvac_mode(mode),
            Err(err) => {
                error!("{err}");
                Reaction::fault(err)
            }
        }
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) -> Reaction {
        if self.mode != mode {
            info!(from = %self.mode, to = %mode, "hvac mode changed");
        }
        self.mode = mode;

        let command = match mode {
            HvacMode::Heat => self.reconcile(),
            HvacMode::Off if self.heater_active => Some(HeaterCommand::TurnOff),
            HvacMode::Off => None,
        };
        Reaction::notified(command)
    }

    pub fn set_target_temperature(&mut self, value: Option<f64>) -> Reaction {
        let Some(target) = value else {
            return Reaction::none();
        };
        if !target.is_finite() {
            let err = ControlError::NonFiniteTarget(target);
            error!("{err}");
            return Reaction::fault(err);
        }

        self.target_temp = Some(target);
        Reaction::notified(self.reconcile())
    }

    pub fn status(&self) -> ClimateStatus {
        ClimateStatus {
            name: self.config.name.clone(),
            hvac_mode: self.mode,
            hvac_action: self.hvac_action(),
            hvac_modes: HvacMode::ALL.to_vec(),
            current_temperature: self.current_temp,
            target_temperature: self.target_temp,
            min_temp: self.config.min_temp,
            max_temp: self.config.max_temp,
            target_temp_step: self.config.target_temp_step,
            precision: PRECISION_TENTHS,
            cold_tolerance: self.config.cold_tolerance,
            hot_tolerance: self.config.hot_tolerance,
            heater_active: self.heater_active,
            heater: self.config.heater.clone(),
            target_sensor: self.config.target_sensor.clone(),
        }
    }

    fn effective_target(&self) -> Option<f64> {
        self.target_temp
            .filter(|target| !(self.config.zero_target_is_unset && *target == 0.0))
    }

    fn reconcile(&self) -> Option<HeaterCommand> {
        if self.mode != HvacMode::Heat {
            return None;
        }
        let (Some(current), Some(target)) = (self.current_temp, self.effective_target()) else {
            return None;
        };

        let too_cold = target - self.config.cold_tolerance;
        let too_hot = target + self.config.hot_tolerance;

        if self.heater_active {
            if current >= too_hot {
                info!(current, too_hot, "turning heater off");
                return Some(HeaterCommand::TurnOff);
            }
        } else if current <= too_cold {
            info!(current, too_cold, "turning heater on");
            return Some(HeaterCommand::TurnOn);
        }

        debug!(current, too_cold, too_hot, "within dead band");
        None
    }
}

fn parse_temperature(raw: &str) -> Result<f64, ControlError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|source| ControlError::UnparseableReading {
            value: raw.to_string(),
            source,
        })?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ControlError::NonFiniteReading(value))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn reading(value: &str) -> EntityState {
        EntityState::parse(value)
    }

    fn controller() -> ThermostatController {
        ThermostatController::new(ThermostatConfig::default())
    }

    fn heating(heater_on: bool, current: f64) -> ThermostatController {
        let mut controller = controller();
        controller.mode = HvacMode::Heat;
        controller.heater_active = heater_on;
        controller.current_temp = Some(current);
        controller
    }

    #[test]
    fn starts_with_configured_defaults() {
        let controller = controller();

        assert_eq!(controller.mode(), HvacMode::Off);
        assert_eq!(controller.current_temperature(), None);
        assert_eq!(controller.target_temperature(), Some(20.0));
        assert!(!controller.is_heater_active());
        assert_eq!(controller.hvac_action(), HvacAction::Off);
    }

    #[test]
    fn tolerances_are_sanitized_once_at_construction() {
        let controller = ThermostatController::new(ThermostatConfig {
            cold_tolerance: -1.0,
            ..ThermostatConfig::default()
        });

        assert_eq!(controller.config().cold_tolerance, 0.0);
        assert_eq!(
            controller.config().hot_tolerance,
            crate::config::DEFAULT_TOLERANCE
        );
    }

    #[test]
    fn dead_band_never_commands() {
        for current in [19.71, 19.8, 20.0, 20.2, 20.29] {
            for heater_on in [false, true] {
                let controller = heating(heater_on, current);
                assert_eq!(controller.reconcile(), None, "current {current}");
            }
        }
    }

    #[test]
    fn turns_on_at_or_below_cold_edge() {
        for current in [19.7, 19.0, -5.0] {
            let controller = heating(false, current);
            assert_eq!(controller.reconcile(), Some(HeaterCommand::TurnOn));
        }
        // Already heating: stay on.
        assert_eq!(heating(true, 15.0).reconcile(), None);
    }

    #[test]
    fn turns_off_at_or_above_hot_edge() {
        for current in [20.3, 21.0, 40.0] {
            let controller = heating(true, current);
            assert_eq!(controller.reconcile(), Some(HeaterCommand::TurnOff));
        }
        // Already idle: nothing to turn off.
        assert_eq!(heating(false, 25.0).reconcile(), None);
    }

    #[test]
    fn sensor_update_reconciles_and_notifies() {
        let mut controller = controller();
        controller.mode = HvacMode::Heat;

        let reaction = controller.on_sensor_update(Some(&reading("19.6")));

        assert_eq!(
            reaction,
            Reaction {
                command: Some(HeaterCommand::TurnOn),
                notify: true,
                fault: None,
            }
        );
        assert_eq!(controller.current_temperature(), Some(19.6));
        // Commands never change the observed heater state.
        assert!(!controller.is_heater_active());
    }

    #[test]
    fn unavailable_or_missing_sensor_is_ignored() {
        let mut controller = heating(false, 19.0);

        for state in [None, Some(EntityState::Unavailable), Some(EntityState::Unknown)] {
            let reaction = controller.on_sensor_update(state.as_ref());
            assert_eq!(reaction, Reaction::none());
            assert_eq!(controller.current_temperature(), Some(19.0));
        }
    }

    #[test]
    fn unparseable_sensor_keeps_last_value() {
        let mut controller = heating(false, 19.0);

        let reaction = controller.on_sensor_update(Some(&reading("warm")));

        assert!(matches!(
            reaction.fault,
            Some(ControlError::UnparseableReading { ref value, .. }) if value == "warm"
        ));
        assert_eq!(reaction.command, None);
        assert!(!reaction.notify);
        assert_eq!(controller.current_temperature(), Some(19.0));

        let reaction = controller.on_sensor_update(Some(&reading("NaN")));
        assert!(matches!(reaction.fault, Some(ControlError::NonFiniteReading(_))));
        assert_eq!(controller.current_temperature(), Some(19.0));
    }

    #[test]
    fn zero_reading_is_a_real_reading() {
        let mut controller = controller();
        controller.mode = HvacMode::Heat;

        let reaction = controller.on_sensor_update(Some(&reading("0")));

        assert_eq!(controller.current_temperature(), Some(0.0));
        assert_eq!(reaction.command, Some(HeaterCommand::TurnOn));
    }

    #[test]
    fn actuator_update_mirrors_state_without_reconciling() {
        let mut controller = heating(false, 10.0);

        let reaction = controller.on_actuator_update(Some(&reading("on")));
        assert_eq!(reaction, Reaction::notified(None));
        assert!(controller.is_heater_active());
        assert_eq!(controller.hvac_action(), HvacAction::Heating);

        // Way too hot, but an echo is not a control trigger.
        controller.current_temp = Some(30.0);
        let reaction = controller.on_actuator_update(Some(&reading("on")));
        assert_eq!(reaction.command, None);

        let reaction = controller.on_actuator_update(Some(&EntityState::Unavailable));
        assert!(reaction.notify);
        assert!(!controller.is_heater_active());
        assert_eq!(controller.hvac_action(), HvacAction::Idle);

        assert_eq!(controller.on_actuator_update(None), Reaction::none());
    }

    #[test]
    fn mode_off_shuts_heater_regardless_of_temperature() {
        let mut controller = heating(true, 10.0);

        let reaction = controller.set_mode("off");

        assert_eq!(reaction, Reaction::notified(Some(HeaterCommand::TurnOff)));
        assert_eq!(controller.mode(), HvacMode::Off);
        assert_eq!(controller.hvac_action(), HvacAction::Off);
    }

    #[test]
    fn mode_off_with_idle_heater_only_notifies() {
        let mut controller = heating(false, 10.0);
        assert_eq!(controller.set_mode("OFF"), Reaction::notified(None));
    }

    #[test]
    fn mode_heat_reconciles() {
        let mut controller = controller();
        controller.current_temp = Some(18.0);

        let reaction = controller.set_mode("heat");

        assert_eq!(reaction, Reaction::notified(Some(HeaterCommand::TurnOn)));
        assert_eq!(controller.mode(), HvacMode::Heat);
    }

    #[test]
    fn invalid_mode_changes_nothing() {
        let mut controller = heating(true, 10.0);

        let reaction = controller.set_mode("cool");

        assert_eq!(
            reaction,
            Reaction::fault(ControlError::InvalidMode("cool".to_string()))
        );
        assert_eq!(controller.mode(), HvacMode::Heat);
    }

    #[test]
    fn missing_target_is_silent_noop() {
        let mut controller = heating(false, 10.0);

        assert_eq!(controller.set_target_temperature(None), Reaction::none());
        assert_eq!(controller.target_temperature(), Some(20.0));
    }

    #[test]
    fn non_finite_target_is_rejected() {
        let mut controller = heating(false, 10.0);

        let reaction = controller.set_target_temperature(Some(f64::INFINITY));

        assert!(matches!(reaction.fault, Some(ControlError::NonFiniteTarget(_))));
        assert_eq!(controller.target_temperature(), Some(20.0));
    }

    #[test]
    fn new_target_reconciles() {
        let mut controller = heating(false, 19.9);
        assert_eq!(controller.set_target_temperature(Some(20.1)), Reaction::notified(None));

        let reaction = controller.set_target_temperature(Some(22.0));

        assert_eq!(reaction, Reaction::notified(Some(HeaterCommand::TurnOn)));
        assert_eq!(controller.target_temperature(), Some(22.0));
    }

    #[test]
    fn zero_target_disables_control_by_default() {
        let mut controller = heating(false, -3.0);
        assert_eq!(
            controller.set_target_temperature(Some(0.0)),
            Reaction::notified(None)
        );

        controller.config.zero_target_is_unset = false;
        assert_eq!(
            controller.set_target_temperature(Some(0.0)),
            Reaction::notified(Some(HeaterCommand::TurnOn))
        );
    }

    #[test]
    fn no_reading_means_no_command() {
        let mut controller = controller();
        assert_eq!(controller.set_mode("heat"), Reaction::notified(None));
    }

    #[test]
    fn scenario_heat_cycle() {
        let mut controller = controller();
        controller.set_mode("heat");

        let reaction = controller.on_sensor_update(Some(&reading("19.6")));
        assert_eq!(reaction.command, Some(HeaterCommand::TurnOn));

        // Heater confirms asynchronously.
        assert_eq!(
            controller.on_actuator_update(Some(&reading("on"))).command,
            None
        );

        let reaction = controller.on_sensor_update(Some(&reading("20.1")));
        assert_eq!(reaction.command, None);

        let reaction = controller.on_sensor_update(Some(&reading("20.35")));
        assert_eq!(reaction.command, Some(HeaterCommand::TurnOff));
    }

    #[test]
    fn scenario_dead_band_from_idle() {
        let mut controller = controller();
        controller.set_mode("heat");

        let reaction = controller.on_sensor_update(Some(&reading("19.8")));

        assert_eq!(reaction.command, None);
        assert!(reaction.notify);
    }

    #[test]
    fn scenario_off_never_commands() {
        let mut controller = controller();
        controller.on_actuator_update(Some(&reading("off")));

        for value in ["5", "19.6", "30", "-10", "20"] {
            let reaction = controller.on_sensor_update(Some(&reading(value)));
            assert_eq!(reaction.command, None);
        }
        assert_eq!(controller.set_target_temperature(Some(28.0)).command, None);
    }

    #[test]
    fn scenario_restore_unavailable_mode() {
        let mut config = ThermostatConfig::default();
        config.initial_hvac_mode = HvacMode::Heat;
        let mut controller = ThermostatController::new(config);

        controller.on_start(Some(&RestoredState {
            mode: Some("unavailable".to_string()),
            target_temperature: Some(21.0),
        }));

        assert_eq!(controller.mode(), HvacMode::Off);
        assert_eq!(controller.target_temperature(), Some(21.0));
    }

    #[test]
    fn restore_keeps_initial_mode_when_nothing_stored() {
        let mut config = ThermostatConfig::default();
        config.initial_hvac_mode = HvacMode::Heat;
        let mut controller = ThermostatController::new(config);

        controller.on_start(Some(&RestoredState::default()));
        assert_eq!(controller.mode(), HvacMode::Heat);
        assert_eq!(controller.target_temperature(), Some(20.0));

        controller.on_start(None);
        assert_eq!(controller.mode(), HvacMode::Heat);
    }

    #[test]
    fn restore_coerces_unrecognized_mode() {
        let mut controller = controller();

        controller.on_start(Some(&RestoredState {
            mode: Some("heat".to_string()),
            target_temperature: Some(f64::NAN),
        }));
        assert_eq!(controller.mode(), HvacMode::Heat);
        assert_eq!(controller.target_temperature(), Some(20.0));

        controller.on_start(Some(&RestoredState {
            mode: Some("cool".to_string()),
            target_temperature: None,
        }));
        assert_eq!(controller.mode(), HvacMode::Off);
    }

    #[test]
    fn snapshot_reflects_mutations() {
        let mut controller = controller();
        controller.set_mode("heat");
        controller.set_target_temperature(Some(22.5));

        let snapshot = controller.snapshot();

        assert_eq!(
            snapshot,
            Snapshot {
                mode: HvacMode::Heat,
                target_temperature: Some(22.5),
            }
        );
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            r#"{"mode":"heat","targetTemperature":22.5}"#
        );
    }

    #[test]
    fn status_exposes_climate_attributes() {
        let mut controller = heating(true, 19.5);
        controller.on_actuator_update(Some(&reading("on")));

        let status = controller.status();

        assert_eq!(status.hvac_mode, HvacMode::Heat);
        assert_eq!(status.hvac_action, HvacAction::Heating);
        assert_eq!(status.hvac_modes, vec![HvacMode::Heat, HvacMode::Off]);
        assert_eq!(status.current_temperature, Some(19.5));
        assert_eq!(status.precision, PRECISION_TENTHS);
        assert_eq!(status.heater, "switch.heater");
    }
}
