use std::num::ParseFloatError;

use thiserror::Error;

/// Recoverable faults absorbed by the controller. None of them stop the loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("unable to update from sensor: {value:?} is not a temperature: {source}")]
    UnparseableReading {
        value: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("unable to update from sensor: reading {0} is not finite")]
    NonFiniteReading(f64),
    #[error("unrecognized hvac mode: {0}")]
    InvalidMode(String),
    #[error("target temperature {0} is not finite")]
    NonFiniteTarget(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} entity id must not be empty")]
    MissingEntity { field: &'static str },
    #[error("{field} entity id {value:?} must not contain MQTT wildcards")]
    WildcardEntity { field: &'static str, value: String },
    #[error("topic prefix must not be empty")]
    EmptyTopicPrefix,
}
