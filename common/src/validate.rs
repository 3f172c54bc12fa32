//! Field checks applied before anything touches [`ApplianceState`].
//!
//! The two surfaces deliberately disagree: the HTTP path clamps an absolute
//! temperature and skips unknown codes, while the cloud skill path rejects
//! anything outside the unit's range so the assistant can report failure.

use serde_json::Value;

use crate::{
    error::CommandError,
    state::{is_valid_temperature, ApplianceState, TEMP_MAX_C, TEMP_MIN_C},
    types::{AcMode, FanSpeed, StateUpdate},
};

/// Validated subset of an HTTP update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub power: Option<bool>,
    pub swing: Option<bool>,
    pub mode: Option<AcMode>,
    pub fan_speed: Option<FanSpeed>,
    pub target_temperature: Option<u8>,
}

impl Candidate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge_into(&self, state: &mut ApplianceState) {
        if let Some(power) = self.power {
            state.power = power;
        }
        if let Some(swing) = self.swing {
            state.swing_enabled = swing;
        }
        if let Some(mode) = self.mode {
            state.mode = mode;
        }
        if let Some(fan_speed) = self.fan_speed {
            state.fan_speed = fan_speed;
        }
        if let Some(temp) = self.target_temperature {
            state.set_target_temperature(temp as i64);
        }
    }
}

pub fn validate_update(update: &StateUpdate) -> Candidate {
    Candidate {
        power: update.power.as_ref().and_then(Value::as_bool),
        swing: update.swing.as_ref().and_then(Value::as_bool),
        mode: update
            .mode
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(AcMode::from_code),
        fan_speed: update
            .fan
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|ordinal| i64::try_from(ordinal).ok())
            .and_then(FanSpeed::from_ordinal),
        target_temperature: update.temp.as_ref().and_then(clamped_temperature),
    }
}

fn clamped_temperature(value: &Value) -> Option<u8> {
    let raw = match value.as_i64() {
        Some(raw) => raw,
        // Integers past i64::MAX are still integers; they clamp to the top.
        None => value.as_u64().map(|_| i64::MAX)?,
    };
    Some(raw.clamp(TEMP_MIN_C as i64, TEMP_MAX_C as i64) as u8)
}

pub fn absolute_temperature(temp_c: f32) -> Result<u8, CommandError> {
    if !is_valid_temperature(temp_c) {
        return Err(CommandError::TemperatureOutOfRange(temp_c));
    }
    Ok(temp_c as u8)
}

/// The range check uses the exact sum; the stored value moves by the
/// whole-degree part of `delta`.
pub fn adjusted_temperature(current_c: u8, delta: f32) -> Result<u8, CommandError> {
    let requested = current_c as f32 + delta;
    if !is_valid_temperature(requested) {
        return Err(CommandError::TemperatureOutOfRange(requested));
    }
    Ok((current_c as i32 + delta.trunc() as i32) as u8)
}

pub fn fan_speed_from_ordinal(ordinal: i64) -> Result<FanSpeed, CommandError> {
    FanSpeed::from_ordinal(ordinal).ok_or(CommandError::FanSpeedOutOfRange(ordinal))
}

pub fn adjusted_fan_speed(current: FanSpeed, delta: i64) -> Result<FanSpeed, CommandError> {
    let requested = (current.ordinal() as i64).saturating_add(delta);
    fan_speed_from_ordinal(requested)
}
