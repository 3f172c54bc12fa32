//! Voice-assistant intents. The assistant's SDK delivers one callback per
//! intent and expects a yes/no answer; the controller binaries receive those
//! callbacks as messages on [`SKILL_COMMAND_TOPICS`](crate::topics::SKILL_COMMAND_TOPICS).

use serde::Serialize;
use thiserror::Error;

use crate::{
    applier::IrBackend,
    controller::AirconController,
    error::CommandError,
    hitachi::HitachiFrame,
    topics::{
        TOPIC_SKILL_FAN, TOPIC_SKILL_FAN_ADJUST, TOPIC_SKILL_MODE, TOPIC_SKILL_POWER,
        TOPIC_SKILL_TARGET, TOPIC_SKILL_TARGET_ADJUST,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum SkillIntent {
    SetPower(bool),
    SetTargetTemperature(f32),
    AdjustTargetTemperature(f32),
    SetThermostatMode(String),
    SetFanSpeed(i64),
    AdjustFanSpeed(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkillParseError {
    #[error("no skill intent is bound to topic `{0}`")]
    UnknownTopic(String),
    #[error("payload `{payload}` is not valid for {intent}")]
    InvalidPayload {
        intent: &'static str,
        payload: String,
    },
}

/// Answer published back to the assistant for every handled intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillReply {
    pub intent: &'static str,
    pub accepted: bool,
}

impl SkillIntent {
    pub fn from_message(topic: &str, payload: &str) -> Result<Self, SkillParseError> {
        let payload = payload.trim();
        let intent = match topic {
            TOPIC_SKILL_POWER => parse_power(payload).map(Self::SetPower),
            TOPIC_SKILL_TARGET => payload.parse().ok().map(Self::SetTargetTemperature),
            TOPIC_SKILL_TARGET_ADJUST => payload.parse().ok().map(Self::AdjustTargetTemperature),
            TOPIC_SKILL_MODE => Some(Self::SetThermostatMode(payload.to_string())),
            TOPIC_SKILL_FAN => payload.parse().ok().map(Self::SetFanSpeed),
            TOPIC_SKILL_FAN_ADJUST => payload.parse().ok().map(Self::AdjustFanSpeed),
            _ => return Err(SkillParseError::UnknownTopic(topic.to_string())),
        };

        intent.ok_or_else(|| SkillParseError::InvalidPayload {
            intent: intent_name_for_topic(topic),
            payload: payload.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPower(_) => "powerState",
            Self::SetTargetTemperature(_) => "targetTemperature",
            Self::AdjustTargetTemperature(_) => "adjustTargetTemperature",
            Self::SetThermostatMode(_) => "thermostatMode",
            Self::SetFanSpeed(_) => "rangeValue",
            Self::AdjustFanSpeed(_) => "adjustRangeValue",
        }
    }

    pub fn apply<B: IrBackend>(
        &self,
        controller: &mut AirconController<B>,
    ) -> Result<HitachiFrame, CommandError> {
        match self {
            Self::SetPower(on) => controller.set_power(*on),
            Self::SetTargetTemperature(temp_c) => controller.set_target_temperature(*temp_c),
            Self::AdjustTargetTemperature(delta) => controller.adjust_target_temperature(*delta),
            Self::SetThermostatMode(mode) => controller.set_thermostat_mode(mode),
            Self::SetFanSpeed(ordinal) => controller.set_fan_speed(*ordinal),
            Self::AdjustFanSpeed(delta) => controller.adjust_fan_speed(*delta),
        }
    }

    pub fn reply(&self, accepted: bool) -> SkillReply {
        SkillReply {
            intent: self.name(),
            accepted,
        }
    }
}

fn parse_power(payload: &str) -> Option<bool> {
    match payload.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn intent_name_for_topic(topic: &str) -> &'static str {
    match topic {
        TOPIC_SKILL_POWER => "powerState",
        TOPIC_SKILL_TARGET => "targetTemperature",
        TOPIC_SKILL_TARGET_ADJUST => "adjustTargetTemperature",
        TOPIC_SKILL_MODE => "thermostatMode",
        TOPIC_SKILL_FAN => "rangeValue",
        TOPIC_SKILL_FAN_ADJUST => "adjustRangeValue",
        _ => "unknown",
    }
}
