use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcMode {
    Auto,
    Cool,
    Dry,
    Fan,
}

impl AcMode {
    /// Numeric code used by the HTTP state payload. Code 3 is unassigned.
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Cool => 1,
            Self::Dry => 2,
            Self::Fan => 4,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Auto),
            1 => Some(Self::Cool),
            2 => Some(Self::Dry),
            4 => Some(Self::Fan),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Cool => "COOL",
            Self::Dry => "DRY",
            Self::Fan => "FAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FanSpeed {
    Auto,
    Low,
    Medium,
    High,
}

impl FanSpeed {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Auto),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Thermostat modes offered by the voice assistant. The unit has no heat
/// pump, so ECO drives dry mode and HEAT drives fan-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Off,
    Auto,
    Cool,
    Eco,
    Heat,
}

impl ThermostatMode {
    /// Appliance mode this thermostat mode selects, `None` for OFF.
    pub fn ac_mode(self) -> Option<AcMode> {
        match self {
            Self::Off => None,
            Self::Auto => Some(AcMode::Auto),
            Self::Cool => Some(AcMode::Cool),
            Self::Eco => Some(AcMode::Dry),
            Self::Heat => Some(AcMode::Fan),
        }
    }
}

impl FromStr for ThermostatMode {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "AUTO" => Ok(Self::Auto),
            "COOL" => Ok(Self::Cool),
            "ECO" => Ok(Self::Eco),
            "HEAT" => Ok(Self::Heat),
            _ => Err(CommandError::UnknownThermostatMode(value.to_string())),
        }
    }
}

/// Body of `GET /state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub power: bool,
    pub swing: bool,
    pub temp: u8,
    pub mode: u8,
    pub fan: u8,
}

/// Body of `PUT`/`POST /state`. Fields stay untyped until validation so
/// that a wrongly typed field is skipped instead of failing the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub power: Option<Value>,
    pub swing: Option<Value>,
    pub mode: Option<Value>,
    pub fan: Option<Value>,
    pub temp: Option<Value>,
}

impl StateUpdate {
    /// Builds an update from an arbitrary JSON document. Anything other than
    /// an object carries no fields.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => Self {
                power: map.remove("power"),
                swing: map.remove("swing"),
                mode: map.remove("mode"),
                fan: map.remove("fan"),
                temp: map.remove("temp"),
            },
            _ => Self::default(),
        }
    }
}
