use thiserror::Error;

use crate::state::{TEMP_MAX_C, TEMP_MIN_C};

/// Reasons a cloud skill command is refused. HTTP updates never produce
/// these: they clamp or skip instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("temperature {0} is outside {min}..={max}", min = TEMP_MIN_C, max = TEMP_MAX_C)]
    TemperatureOutOfRange(f32),
    #[error("fan speed ordinal {0} is outside 0..=3")]
    FanSpeedOutOfRange(i64),
    #[error("unknown thermostat mode `{0}`")]
    UnknownThermostatMode(String),
}
