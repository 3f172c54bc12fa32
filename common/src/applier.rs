use crate::{
    hitachi::{HitachiAc1, HitachiFrame},
    state::ApplianceState,
};

/// Sink for finished IR frames. Sending is fire-and-forget: a backend that
/// fails records it for diagnostics but never reports back to the command.
pub trait IrBackend {
    fn transmit(&mut self, frame: &HitachiFrame);
}

/// Re-asserts the complete appliance state with a single frame per call.
pub struct CommandApplier<B> {
    encoder: HitachiAc1,
    backend: B,
}

impl<B: IrBackend> CommandApplier<B> {
    pub fn new(backend: B) -> Self {
        Self {
            encoder: HitachiAc1::new(),
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn apply(&mut self, state: &ApplianceState) -> HitachiFrame {
        if state.power {
            self.encoder.on();
            // Fan before mode: the mode setter re-checks the fan constraint.
            self.encoder.set_fan(state.fan_speed);
            self.encoder.set_mode(state.mode);
            self.encoder.set_temp(state.target_temperature());
            self.encoder.set_swing_v(state.swing_enabled);
            self.encoder.set_swing_h(state.swing_enabled);
        } else {
            self.encoder.off();
        }

        let frame = self.encoder.commit();
        self.backend.transmit(&frame);
        frame
    }
}
