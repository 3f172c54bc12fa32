pub const TOPIC_STATE: &str = "aircon/state";

pub const TOPIC_SKILL_POWER: &str = "aircon/skill/power";
pub const TOPIC_SKILL_TARGET: &str = "aircon/skill/target";
pub const TOPIC_SKILL_TARGET_ADJUST: &str = "aircon/skill/target/adjust";
pub const TOPIC_SKILL_MODE: &str = "aircon/skill/mode";
pub const TOPIC_SKILL_FAN: &str = "aircon/skill/fan";
pub const TOPIC_SKILL_FAN_ADJUST: &str = "aircon/skill/fan/adjust";
pub const TOPIC_SKILL_RESULT: &str = "aircon/skill/result";

pub const SKILL_COMMAND_TOPICS: [&str; 6] = [
    TOPIC_SKILL_POWER,
    TOPIC_SKILL_TARGET,
    TOPIC_SKILL_TARGET_ADJUST,
    TOPIC_SKILL_MODE,
    TOPIC_SKILL_FAN,
    TOPIC_SKILL_FAN_ADJUST,
];
