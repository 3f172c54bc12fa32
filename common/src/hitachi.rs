//! Hitachi AC1 (remote R-LT0541-HTA) IR protocol.
//!
//! The remote sends its whole configuration as one 104-bit message, so
//! every frame carries power, mode, fan, temperature and swing together.
//! Power and swing are additionally flagged with toggle bits whenever they
//! differ from the previously committed frame.
//!
//! Field dependencies: dry mode only runs the fan on LOW, and fan-only mode
//! has no AUTO fan (sent as LOW). The mode setter re-applies the fan rule, so
//! callers set the fan before the mode.

use crate::{
    state::{TEMP_MAX_C, TEMP_MIN_C},
    types::{AcMode, FanSpeed},
};

pub const HITACHI_AC1_STATE_LENGTH: usize = 13;
pub const HITACHI_AC1_BITS: usize = HITACHI_AC1_STATE_LENGTH * 8;
pub const HITACHI_AC1_CARRIER_KHZ: u32 = 38;
/// Silence the receiver needs between two messages.
pub const HITACHI_AC1_MIN_GAP_US: u32 = 100_000;

const HDR_MARK_US: u16 = 3_400;
const HDR_SPACE_US: u16 = 3_400;
const BIT_MARK_US: u16 = 400;
const ONE_SPACE_US: u16 = 1_250;
const ZERO_SPACE_US: u16 = 500;

const STATE_RESET: [u8; HITACHI_AC1_STATE_LENGTH] = [
    0xB2, 0xAE, 0x4D, 0x91, 0xF0, 0xE1, 0xA4, 0x00, 0x00, 0x00, 0x00, 0x61, 0x24,
];

const MODEL_BYTE: usize = 3;
const MODEL_MASK: u8 = 0b1100_0000;
const MODEL_R_LT0541_HTA_A: u8 = 0b10;

const MODE_FAN_BYTE: usize = 5;
const MODE_DRY: u8 = 0b0010;
const MODE_FAN: u8 = 0b0100;
const MODE_COOL: u8 = 0b0110;
const MODE_AUTO: u8 = 0b1110;
const FAN_AUTO: u8 = 0b0001;
const FAN_HIGH: u8 = 0b0010;
const FAN_MED: u8 = 0b0100;
const FAN_LOW: u8 = 0b1000;

const TEMP_BYTE: usize = 6;
const TEMP_OFFSET: usize = 2;
const TEMP_SIZE: u32 = 5;
const TEMP_DELTA: u8 = 7;

const FLAGS_BYTE: usize = 11;
const POWER_TOGGLE_BIT: u8 = 1 << 0;
const SWING_TOGGLE_BIT: u8 = 1 << 4;
const SWING_V_BIT: u8 = 1 << 5;
const SWING_H_BIT: u8 = 1 << 6;
const POWER_BIT: u8 = 1 << 7;

const CHECKSUM_START: usize = 5;
const CHECKSUM_BYTE: usize = HITACHI_AC1_STATE_LENGTH - 1;

/// Encoder state for one Hitachi AC1 unit. It remembers the last committed
/// frame so toggle bits are only raised on real changes.
#[derive(Debug, Clone)]
pub struct HitachiAc1 {
    state: [u8; HITACHI_AC1_STATE_LENGTH],
    requested_fan: FanSpeed,
}

impl Default for HitachiAc1 {
    fn default() -> Self {
        Self::new()
    }
}

impl HitachiAc1 {
    pub fn new() -> Self {
        let mut encoder = Self {
            state: STATE_RESET,
            requested_fan: FanSpeed::Auto,
        };
        encoder.state[MODEL_BYTE] =
            (encoder.state[MODEL_BYTE] & !MODEL_MASK) | (MODEL_R_LT0541_HTA_A << 6);
        encoder
    }

    pub fn power(&self) -> bool {
        self.state[FLAGS_BYTE] & POWER_BIT != 0
    }

    pub fn on(&mut self) {
        self.set_power(true);
    }

    pub fn off(&mut self) {
        self.set_power(false);
    }

    fn set_power(&mut self, on: bool) {
        if on != self.power() {
            self.state[FLAGS_BYTE] |= POWER_TOGGLE_BIT;
        }
        set_bit(&mut self.state[FLAGS_BYTE], POWER_BIT, on);
    }

    pub fn mode(&self) -> Option<AcMode> {
        match self.state[MODE_FAN_BYTE] >> 4 {
            MODE_AUTO => Some(AcMode::Auto),
            MODE_COOL => Some(AcMode::Cool),
            MODE_DRY => Some(AcMode::Dry),
            MODE_FAN => Some(AcMode::Fan),
            _ => None,
        }
    }

    pub fn set_mode(&mut self, mode: AcMode) {
        let code = match mode {
            AcMode::Auto => MODE_AUTO,
            AcMode::Cool => MODE_COOL,
            AcMode::Dry => MODE_DRY,
            AcMode::Fan => MODE_FAN,
        };
        self.state[MODE_FAN_BYTE] = (self.state[MODE_FAN_BYTE] & 0x0F) | (code << 4);
        self.set_fan(self.requested_fan);
    }

    pub fn fan(&self) -> Option<FanSpeed> {
        match self.state[MODE_FAN_BYTE] & 0x0F {
            FAN_AUTO => Some(FanSpeed::Auto),
            FAN_LOW => Some(FanSpeed::Low),
            FAN_MED => Some(FanSpeed::Medium),
            FAN_HIGH => Some(FanSpeed::High),
            _ => None,
        }
    }

    /// Stores `speed` as the wanted speed and encodes what the current mode
    /// allows of it.
    pub fn set_fan(&mut self, speed: FanSpeed) {
        self.requested_fan = speed;
        let speed = match (self.mode(), speed) {
            (Some(AcMode::Dry), _) => FanSpeed::Low,
            (Some(AcMode::Fan), FanSpeed::Auto) => FanSpeed::Low,
            (_, speed) => speed,
        };
        let code = match speed {
            FanSpeed::Auto => FAN_AUTO,
            FanSpeed::Low => FAN_LOW,
            FanSpeed::Medium => FAN_MED,
            FanSpeed::High => FAN_HIGH,
        };
        self.state[MODE_FAN_BYTE] = (self.state[MODE_FAN_BYTE] & 0xF0) | code;
    }

    pub fn temp(&self) -> u8 {
        let raw = (self.state[TEMP_BYTE] >> TEMP_OFFSET) & field_mask(TEMP_SIZE);
        reverse_bits(raw, TEMP_SIZE) + TEMP_DELTA
    }

    pub fn set_temp(&mut self, temp_c: u8) {
        let temp_c = temp_c.clamp(TEMP_MIN_C, TEMP_MAX_C);
        let raw = reverse_bits(temp_c - TEMP_DELTA, TEMP_SIZE);
        let mask = field_mask(TEMP_SIZE) << TEMP_OFFSET;
        self.state[TEMP_BYTE] = (self.state[TEMP_BYTE] & !mask) | (raw << TEMP_OFFSET);
    }

    pub fn swing_v(&self) -> bool {
        self.state[FLAGS_BYTE] & SWING_V_BIT != 0
    }

    pub fn set_swing_v(&mut self, on: bool) {
        self.set_swing(SWING_V_BIT, on);
    }

    pub fn swing_h(&self) -> bool {
        self.state[FLAGS_BYTE] & SWING_H_BIT != 0
    }

    pub fn set_swing_h(&mut self, on: bool) {
        self.set_swing(SWING_H_BIT, on);
    }

    fn set_swing(&mut self, bit: u8, on: bool) {
        if on != (self.state[FLAGS_BYTE] & bit != 0) {
            self.state[FLAGS_BYTE] |= SWING_TOGGLE_BIT;
        }
        set_bit(&mut self.state[FLAGS_BYTE], bit, on);
    }

    /// Seals the current settings into a frame and clears the toggle bits
    /// so the next identical frame does not flip power or swing again.
    pub fn commit(&mut self) -> HitachiFrame {
        self.state[CHECKSUM_BYTE] = checksum(&self.state);
        let frame = HitachiFrame(self.state);
        self.state[FLAGS_BYTE] &= !(POWER_TOGGLE_BIT | SWING_TOGGLE_BIT);
        frame
    }
}

/// One complete 13-byte message, ready for modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitachiFrame([u8; HITACHI_AC1_STATE_LENGTH]);

impl HitachiFrame {
    pub fn bytes(&self) -> &[u8; HITACHI_AC1_STATE_LENGTH] {
        &self.0
    }

    pub fn power(&self) -> bool {
        self.0[FLAGS_BYTE] & POWER_BIT != 0
    }

    pub fn power_toggled(&self) -> bool {
        self.0[FLAGS_BYTE] & POWER_TOGGLE_BIT != 0
    }

    pub fn swing_toggled(&self) -> bool {
        self.0[FLAGS_BYTE] & SWING_TOGGLE_BIT != 0
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.0[CHECKSUM_BYTE] == checksum(&self.0)
    }

    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mark/space durations in microseconds, starting with a mark. The
    /// trailing gap is left to the transmitter.
    pub fn raw_timings(&self) -> Vec<u16> {
        let mut timings = Vec::with_capacity(3 + HITACHI_AC1_BITS * 2);
        timings.push(HDR_MARK_US);
        timings.push(HDR_SPACE_US);
        for byte in self.0 {
            for bit in (0..8).rev() {
                timings.push(BIT_MARK_US);
                timings.push(if byte & (1 << bit) != 0 {
                    ONE_SPACE_US
                } else {
                    ZERO_SPACE_US
                });
            }
        }
        timings.push(BIT_MARK_US);
        timings
    }
}

fn checksum(state: &[u8; HITACHI_AC1_STATE_LENGTH]) -> u8 {
    let sum = state[CHECKSUM_START..CHECKSUM_BYTE]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(byte.reverse_bits()));
    sum.reverse_bits()
}

fn reverse_bits(value: u8, nbits: u32) -> u8 {
    value.reverse_bits() >> (8 - nbits)
}

fn field_mask(nbits: u32) -> u8 {
    ((1u16 << nbits) - 1) as u8
}

fn set_bit(byte: &mut u8, bit: u8, on: bool) {
    if on {
        *byte |= bit;
    } else {
        *byte &= !bit;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reset_state_decodes_to_unit_defaults() {
        let encoder = HitachiAc1::new();
        assert_eq!(encoder.mode(), Some(AcMode::Auto));
        assert_eq!(encoder.fan(), Some(FanSpeed::Auto));
        assert_eq!(encoder.temp(), 25);
        assert!(!encoder.power());
    }

    #[test]
    fn mode_nibble_per_mode() {
        let cases = [
            (AcMode::Auto, 0xE8),
            (AcMode::Cool, 0x68),
            (AcMode::Dry, 0x28),
            (AcMode::Fan, 0x48),
        ];
        for (mode, expected) in cases {
            let mut encoder = HitachiAc1::new();
            encoder.set_fan(FanSpeed::Low);
            encoder.set_mode(mode);
            let frame = encoder.commit();
            assert_eq!(frame.bytes()[MODE_FAN_BYTE], expected, "{mode:?}");
            assert_eq!(encoder.mode(), Some(mode));
        }
    }

    #[test]
    fn temperature_round_trips_across_range() {
        let mut encoder = HitachiAc1::new();
        for temp in TEMP_MIN_C..=TEMP_MAX_C {
            encoder.set_temp(temp);
            assert_eq!(encoder.temp(), temp);
        }
        encoder.set_temp(40);
        assert_eq!(encoder.temp(), TEMP_MAX_C);
    }

    #[test]
    fn dry_mode_forces_low_fan() {
        let mut encoder = HitachiAc1::new();
        encoder.set_fan(FanSpeed::High);
        encoder.set_mode(AcMode::Dry);
        assert_eq!(encoder.fan(), Some(FanSpeed::Low));

        encoder.set_fan(FanSpeed::High);
        assert_eq!(encoder.fan(), Some(FanSpeed::Low));
    }

    #[test]
    fn fan_mode_has_no_auto_speed() {
        let mut encoder = HitachiAc1::new();
        encoder.set_fan(FanSpeed::Auto);
        encoder.set_mode(AcMode::Fan);
        assert_eq!(encoder.fan(), Some(FanSpeed::Low));

        encoder.set_fan(FanSpeed::Medium);
        assert_eq!(encoder.fan(), Some(FanSpeed::Medium));
    }

    #[test]
    fn power_toggle_only_on_change() {
        let mut encoder = HitachiAc1::new();
        let _ = encoder.commit();

        encoder.on();
        let first = encoder.commit();
        assert!(first.power());
        assert!(first.power_toggled());

        encoder.on();
        let second = encoder.commit();
        assert!(second.power());
        assert!(!second.power_toggled());

        encoder.off();
        let third = encoder.commit();
        assert!(!third.power());
        assert!(third.power_toggled());
    }

    #[test]
    fn swing_toggle_tracks_either_axis() {
        let mut encoder = HitachiAc1::new();
        encoder.set_swing_v(false);
        encoder.set_swing_h(false);
        assert!(encoder.commit().swing_toggled());

        encoder.set_swing_v(false);
        encoder.set_swing_h(false);
        let frame = encoder.commit();
        assert!(!frame.swing_toggled());
        assert!(!encoder.swing_v());
        assert!(!encoder.swing_h());
    }

    #[test]
    fn committed_frames_carry_valid_checksum() {
        let mut encoder = HitachiAc1::new();
        encoder.on();
        encoder.set_mode(AcMode::Auto);
        encoder.set_temp(19);
        let frame = encoder.commit();
        assert!(frame.has_valid_checksum());
        assert_eq!(frame.bytes()[..3], [0xB2, 0xAE, 0x4D]);
        assert_eq!(frame.bytes()[MODEL_BYTE] >> 6, MODEL_R_LT0541_HTA_A);
    }

    #[test]
    fn raw_timings_encode_msb_first() {
        let mut encoder = HitachiAc1::new();
        let frame = encoder.commit();
        let timings = frame.raw_timings();

        assert_eq!(timings.len(), 3 + HITACHI_AC1_BITS * 2);
        assert_eq!(&timings[..2], &[HDR_MARK_US, HDR_SPACE_US]);
        // 0xB2 = 1011_0010
        let first_byte_spaces: Vec<u16> = timings[2..18].iter().skip(1).step_by(2).copied().collect();
        assert_eq!(
            first_byte_spaces,
            vec![
                ONE_SPACE_US,
                ZERO_SPACE_US,
                ONE_SPACE_US,
                ONE_SPACE_US,
                ZERO_SPACE_US,
                ZERO_SPACE_US,
                ONE_SPACE_US,
                ZERO_SPACE_US,
            ]
        );
        assert_eq!(timings.last(), Some(&BIT_MARK_US));
    }

    #[test]
    fn hex_dump_is_space_separated() {
        let frame = HitachiFrame(STATE_RESET);
        assert!(frame.to_hex().starts_with("B2 AE 4D 91"));
    }
}
