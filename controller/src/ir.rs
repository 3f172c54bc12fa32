use core::convert::TryInto;
use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::{info, warn};
use serde::Serialize;

use aircon_common::{
    hitachi::{HITACHI_AC1_CARRIER_KHZ, HITACHI_AC1_MIN_GAP_US},
    HitachiFrame, IrBackend,
};

// 80 MHz APB clock / 80 gives one tick per microsecond.
const IR_TICK_DIVIDER: u8 = 80;

enum IrDriver {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    driver: IrDriver,
    tx_pin: i32,
    carrier_khz: u32,
    last_send_ms: Option<u64>,
    sent_frames: u64,
    failed_frames: u64,
    last_frame: Option<String>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IrDiagnostics {
    pub enabled: bool,
    #[serde(rename = "txPin")]
    pub tx_pin: i32,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "lastSendMs")]
    pub last_send_ms: Option<u64>,
    #[serde(rename = "sentFrames")]
    pub sent_frames: u64,
    #[serde(rename = "failedFrames")]
    pub failed_frames: u64,
    #[serde(rename = "lastFrame")]
    pub last_frame: Option<String>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

impl IrTransmitter {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        tx_pin: i32,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;
        info!("IR transmitter ready on GPIO{tx_pin} at {carrier_khz} kHz");

        Ok(Self {
            driver: IrDriver::Rmt(tx),
            carrier_khz,
            ..Self::disabled(tx_pin)
        })
    }

    pub fn disabled(tx_pin: i32) -> Self {
        Self {
            driver: IrDriver::Disabled,
            tx_pin,
            carrier_khz: HITACHI_AC1_CARRIER_KHZ,
            last_send_ms: None,
            sent_frames: 0,
            failed_frames: 0,
            last_frame: None,
            last_error: None,
        }
    }

    pub fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: matches!(self.driver, IrDriver::Rmt(_)),
            tx_pin: self.tx_pin,
            carrier_khz: self.carrier_khz,
            last_send_ms: self.last_send_ms,
            sent_frames: self.sent_frames,
            failed_frames: self.failed_frames,
            last_frame: self.last_frame.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn send_raw(&mut self, raw: &[u16]) -> anyhow::Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        if matches!(self.driver, IrDriver::Disabled) {
            return Err(anyhow!("IR transmitter disabled, frame not sent"));
        }

        self.wait_for_gap();

        let mut pulses = Vec::with_capacity(raw.len());
        for (index, duration) in raw.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            pulses.push(Pulse::new(
                level,
                PulseTicks::new(*duration).context("invalid IR pulse duration")?,
            ));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert IR timings to RMT signal")?;

        if let IrDriver::Rmt(tx) = &mut self.driver {
            tx.start_blocking(&signal)
                .context("failed to transmit IR frame over RMT")?;
        }

        self.last_send_ms = Some(monotonic_ms());
        self.sent_frames = self.sent_frames.saturating_add(1);
        Ok(())
    }

    fn wait_for_gap(&self) {
        let min_gap_ms = u64::from(HITACHI_AC1_MIN_GAP_US / 1000);
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < min_gap_ms {
                thread::sleep(Duration::from_millis(min_gap_ms - elapsed));
            }
        }
    }
}

impl IrBackend for IrTransmitter {
    fn transmit(&mut self, frame: &HitachiFrame) {
        let hex = frame.to_hex();
        match self.send_raw(&frame.raw_timings()) {
            Ok(()) => {
                info!("IR frame [{hex}]");
                self.last_error = None;
            }
            Err(err) => {
                warn!("IR frame [{hex}] failed: {err:#}");
                self.failed_frames = self.failed_frames.saturating_add(1);
                self.last_error = Some(format!("{err:#}"));
            }
        }
        self.last_frame = Some(hex);
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
