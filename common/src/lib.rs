pub mod applier;
pub mod config;
pub mod controller;
pub mod error;
pub mod hitachi;
pub mod skill;
pub mod state;
pub mod topics;
pub mod types;
pub mod validate;

pub use applier::{CommandApplier, IrBackend};
pub use config::{HttpConfig, IrHardwareConfig, NetworkConfig, RuntimeConfig};
pub use controller::AirconController;
pub use error::CommandError;
pub use hitachi::{HitachiAc1, HitachiFrame};
pub use skill::{SkillIntent, SkillParseError, SkillReply};
pub use state::ApplianceState;
pub use topics::*;
pub use types::{AcMode, FanSpeed, StatePayload, StateUpdate, ThermostatMode};
