pub mod config;
pub mod error;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{NetworkConfig, RuntimeConfig, ThermostatConfig};
pub use error::{ConfigError, ControlError};
pub use thermostat::ThermostatController;
pub use topics::Topics;
pub use types::{
    ClimateStatus, EntityState, HeaterCommand, HvacAction, HvacMode, Reaction, RestoredState,
    Snapshot, STATE_OFF, STATE_ON, STATE_UNAVAILABLE, STATE_UNKNOWN,
};
