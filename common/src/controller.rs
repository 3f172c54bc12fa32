use crate::{
    applier::{CommandApplier, IrBackend},
    error::CommandError,
    hitachi::HitachiFrame,
    state::ApplianceState,
    types::{StatePayload, StateUpdate, ThermostatMode},
    validate::{
        absolute_temperature, adjusted_fan_speed, adjusted_temperature, fan_speed_from_ordinal,
        validate_update, Candidate,
    },
};

/// Owns the appliance state and the transmitter. Every accepted command
/// mutates the state and sends exactly one full-state frame; a rejected
/// command leaves both untouched.
pub struct AirconController<B> {
    state: ApplianceState,
    applier: CommandApplier<B>,
    transmissions: u64,
}

impl<B: IrBackend> AirconController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            state: ApplianceState::default(),
            applier: CommandApplier::new(backend),
            transmissions: 0,
        }
    }

    pub fn state(&self) -> &ApplianceState {
        &self.state
    }

    pub fn payload(&self) -> StatePayload {
        self.state.payload()
    }

    pub fn backend(&self) -> &B {
        self.applier.backend()
    }

    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    /// HTTP write path. Always transmits, even when nothing changed.
    pub fn apply_update(&mut self, update: &StateUpdate) -> (Candidate, HitachiFrame) {
        let candidate = validate_update(update);
        candidate.merge_into(&mut self.state);
        (candidate, self.transmit())
    }

    pub fn set_power(&mut self, on: bool) -> Result<HitachiFrame, CommandError> {
        self.state.power = on;
        Ok(self.transmit())
    }

    pub fn set_target_temperature(&mut self, temp_c: f32) -> Result<HitachiFrame, CommandError> {
        let temp_c = absolute_temperature(temp_c)?;
        self.state.set_target_temperature(temp_c as i64);
        Ok(self.transmit())
    }

    pub fn adjust_target_temperature(&mut self, delta: f32) -> Result<HitachiFrame, CommandError> {
        let temp_c = adjusted_temperature(self.state.target_temperature(), delta)?;
        self.state.set_target_temperature(temp_c as i64);
        Ok(self.transmit())
    }

    /// Any mode other than OFF also switches the unit on.
    pub fn set_thermostat_mode(&mut self, mode: &str) -> Result<HitachiFrame, CommandError> {
        let mode: ThermostatMode = mode.parse()?;
        match mode.ac_mode() {
            Some(ac_mode) => {
                self.state.power = true;
                self.state.mode = ac_mode;
            }
            None => self.state.power = false,
        }
        Ok(self.transmit())
    }

    pub fn set_fan_speed(&mut self, ordinal: i64) -> Result<HitachiFrame, CommandError> {
        self.state.fan_speed = fan_speed_from_ordinal(ordinal)?;
        Ok(self.transmit())
    }

    pub fn adjust_fan_speed(&mut self, delta: i64) -> Result<HitachiFrame, CommandError> {
        self.state.fan_speed = adjusted_fan_speed(self.state.fan_speed, delta)?;
        Ok(self.transmit())
    }

    fn transmit(&mut self) -> HitachiFrame {
        self.transmissions = self.transmissions.saturating_add(1);
        self.applier.apply(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        applier::tests::RecordingBackend,
        types::{AcMode, FanSpeed},
    };

    fn controller() -> AirconController<RecordingBackend> {
        AirconController::new(RecordingBackend::default())
    }

    fn post(controller: &mut AirconController<RecordingBackend>, body: serde_json::Value) {
        let _ = controller.apply_update(&StateUpdate::from_value(body));
    }

    #[test]
    fn http_mode_codes_round_trip() {
        for code in [0u8, 1, 2, 4] {
            let mut controller = controller();
            post(&mut controller, json!({ "mode": code }));
            assert_eq!(controller.payload().mode, code);
        }
    }

    #[test]
    fn http_unknown_mode_code_keeps_mode_but_still_transmits() {
        let mut controller = controller();
        post(&mut controller, json!({ "mode": 2 }));
        post(&mut controller, json!({ "mode": 3 }));

        assert_eq!(controller.state().mode, AcMode::Dry);
        assert_eq!(controller.backend().frames.len(), 2);
    }

    #[test]
    fn http_temperature_clamps() {
        let mut controller = controller();
        post(&mut controller, json!({ "temp": 99 }));
        assert_eq!(controller.payload().temp, 32);
        post(&mut controller, json!({ "temp": 3 }));
        assert_eq!(controller.payload().temp, 16);
    }

    #[test]
    fn http_power_off_sends_one_off_frame() {
        let mut controller = controller();
        post(&mut controller, json!({ "power": true }));
        post(&mut controller, json!({ "power": false }));

        assert!(!controller.payload().power);
        let frames = &controller.backend().frames;
        assert_eq!(frames.len(), 2);
        assert!(!frames[1].power());
        assert_eq!(frames.iter().filter(|frame| !frame.power()).count(), 1);
    }

    #[test]
    fn empty_update_still_transmits() {
        let mut controller = controller();
        post(&mut controller, json!({}));
        assert_eq!(controller.transmissions(), 1);
        assert_eq!(controller.state(), &ApplianceState::default());
    }

    #[test]
    fn cloud_absolute_temperature_rejects_out_of_range() {
        let mut controller = controller();
        assert!(controller.set_target_temperature(40.0).is_err());
        assert!(controller.set_target_temperature(10.0).is_err());
        assert_eq!(controller.payload().temp, 25);
        assert_eq!(controller.transmissions(), 0);

        assert!(controller.set_target_temperature(21.0).is_ok());
        assert_eq!(controller.payload().temp, 21);
    }

    #[test]
    fn cloud_relative_temperature() {
        let mut controller = controller();
        assert_eq!(
            controller.adjust_target_temperature(10.0).map(|_| ()),
            Err(CommandError::TemperatureOutOfRange(35.0))
        );
        assert_eq!(controller.payload().temp, 25);
        assert!(controller.backend().frames.is_empty());

        assert!(controller.adjust_target_temperature(5.0).is_ok());
        assert_eq!(controller.payload().temp, 30);
        assert_eq!(controller.backend().frames.len(), 1);
    }

    #[test]
    fn cloud_fan_adjust_past_high_is_rejected() {
        let mut controller = controller();
        assert!(controller.set_fan_speed(3).is_ok());
        assert!(controller.adjust_fan_speed(1).is_err());
        assert_eq!(controller.state().fan_speed, FanSpeed::High);
        assert_eq!(controller.transmissions(), 1);

        assert!(controller.adjust_fan_speed(-2).is_ok());
        assert_eq!(controller.state().fan_speed, FanSpeed::Low);
    }

    #[test]
    fn cloud_fan_absolute_range() {
        let mut controller = controller();
        assert!(controller.set_fan_speed(4).is_err());
        assert!(controller.set_fan_speed(-1).is_err());
        assert_eq!(controller.state().fan_speed, FanSpeed::Auto);
    }

    #[test]
    fn eco_selects_dry_and_powers_on() {
        let mut controller = controller();
        assert!(controller.set_thermostat_mode("ECO").is_ok());
        assert_eq!(controller.state().mode, AcMode::Dry);
        assert!(controller.state().power);

        assert!(controller.set_thermostat_mode("HEAT").is_ok());
        assert_eq!(controller.state().mode, AcMode::Fan);
    }

    #[test]
    fn thermostat_off_keeps_mode() {
        let mut controller = controller();
        let _ = controller.set_thermostat_mode("AUTO");
        let frame = controller.set_thermostat_mode("OFF").unwrap();

        assert!(!frame.power());
        assert!(!controller.state().power);
        assert_eq!(controller.state().mode, AcMode::Auto);
    }

    #[test]
    fn unknown_thermostat_mode_changes_nothing() {
        let mut controller = controller();
        assert!(controller.set_thermostat_mode("TURBO").is_err());
        assert!(!controller.state().power);
        assert_eq!(controller.transmissions(), 0);
    }

    #[test]
    fn set_power_always_accepts() {
        let mut controller = controller();
        assert!(controller.set_power(true).unwrap().power());
        assert!(controller.set_power(true).is_ok());
        assert_eq!(controller.transmissions(), 2);
    }
}
