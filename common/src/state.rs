use std::fmt;

use crate::types::{AcMode, FanSpeed, StatePayload};

pub const TEMP_MIN_C: u8 = 16;
pub const TEMP_MAX_C: u8 = 32;
pub const TEMP_DEFAULT_C: u8 = 25;

/// Desired configuration of the air conditioner. This is what the unit is
/// told on every transmission, not what it reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceState {
    pub power: bool,
    pub mode: AcMode,
    pub fan_speed: FanSpeed,
    target_temperature: u8,
    pub swing_enabled: bool,
}

impl Default for ApplianceState {
    fn default() -> Self {
        Self {
            power: false,
            mode: AcMode::Cool,
            fan_speed: FanSpeed::Auto,
            target_temperature: TEMP_DEFAULT_C,
            swing_enabled: false,
        }
    }
}

impl ApplianceState {
    pub fn target_temperature(&self) -> u8 {
        self.target_temperature
    }

    /// Stores the target clamped into the unit's range and returns the
    /// stored value.
    pub fn set_target_temperature(&mut self, temp_c: i64) -> u8 {
        let clamped = temp_c.clamp(TEMP_MIN_C as i64, TEMP_MAX_C as i64) as u8;
        self.target_temperature = clamped;
        clamped
    }

    pub fn payload(&self) -> StatePayload {
        StatePayload {
            power: self.power,
            swing: self.swing_enabled,
            temp: self.target_temperature,
            mode: self.mode.code(),
            fan: self.fan_speed.ordinal(),
        }
    }
}

impl fmt::Display for ApplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "power={} mode={} fan={} temp={}C swing={}",
            if self.power { "ON" } else { "OFF" },
            self.mode.as_str(),
            self.fan_speed.as_str(),
            self.target_temperature,
            self.swing_enabled,
        )
    }
}

pub fn is_valid_temperature(temp_c: f32) -> bool {
    temp_c.is_finite() && (TEMP_MIN_C as f32..=TEMP_MAX_C as f32).contains(&temp_c)
}
