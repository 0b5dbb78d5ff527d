//! Wire-level device models for the simulator.
//!
//! Everything the firmware would find on the board is faked here at the bus
//! level: both sensors answer real I²C register and command traffic on one
//! shared bus, and the panel decodes the actual SPI command stream. The core
//! crate's drivers run unmodified on top.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, SevenBitAddress};
use embedded_hal::spi::{self, Operation as SpiOperation, SpiDevice};
use log::{debug, info};

const ENV_ADDR: u8 = 0x76;
const AIR_ADDR: u8 = 0x58;

/// Samples the fake air sensor spends in its bootstrap window.
const AIR_WARMUP_SAMPLES: u32 = 15;

// ---------------------------------------------------------------------------
// I2C bus
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SimI2cError(pub ErrorKind);

impl i2c::Error for SimI2cError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// One I²C bus with both sensors attached.
pub struct SimBus {
    env: Bme280Model,
    air: Sgp30Model,
    /// When set, the air sensor stops acknowledging its address.
    air_offline: bool,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            env: Bme280Model::new(),
            air: Sgp30Model::new(),
            air_offline: false,
        }
    }

    pub fn set_air_offline(&mut self, offline: bool) {
        if offline != self.air_offline {
            info!(
                "sim: air sensor {}",
                if offline { "unplugged" } else { "plugged back in" }
            );
        }
        self.air_offline = offline;
    }
}

impl i2c::ErrorType for SimBus {
    type Error = SimI2cError;
}

impl I2c<SevenBitAddress> for SimBus {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        match address {
            ENV_ADDR => {
                self.env.handle(operations);
                Ok(())
            }
            AIR_ADDR if self.air_offline => Err(SimI2cError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            ))),
            AIR_ADDR => {
                self.air.handle(operations);
                Ok(())
            }
            _ => Err(SimI2cError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// BME280 model
// ---------------------------------------------------------------------------

/// Trimming blocks of the datasheet's compensation example.
const CALIB_BLOCK0: [u8; 26] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
    0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x4B,
];
const CALIB_BLOCK1: [u8; 7] = [0x6B, 0x01, 0x00, 0x14, 0x20, 0x03, 0x1E];

/// Register-level BME280 fake with slowly wandering raw values.
struct Bme280Model {
    reg: u8,
    sample_index: u32,
}

impl Bme280Model {
    fn new() -> Self {
        Self {
            reg: 0,
            sample_index: 0,
        }
    }

    fn handle(&mut self, operations: &mut [i2c::Operation<'_>]) {
        for op in operations {
            match op {
                i2c::Operation::Write(bytes) => self.write(bytes),
                i2c::Operation::Read(buf) => self.read(buf),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        match bytes {
            [reg] => self.reg = *reg,
            [reg, value] => {
                self.reg = *reg;
                // forced-mode trigger advances the synthetic weather
                if *reg == 0xF4 && value & 0x03 != 0 {
                    self.sample_index += 1;
                }
            }
            _ => {}
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        match self.reg {
            0xD0 => buf[0] = 0x60,
            // never busy: conversions are instantaneous here
            0xF3 => buf[0] = 0x00,
            0x88 => buf.copy_from_slice(&CALIB_BLOCK0[..buf.len()]),
            0xE1 => buf.copy_from_slice(&CALIB_BLOCK1[..buf.len()]),
            0xF7 => self.fill_burst(buf),
            _ => buf.fill(0),
        }
    }

    /// Raw ADC words around the datasheet example (about 25 °C, 1006 hPa,
    /// 68 %RH), each drifting on its own period.
    fn fill_burst(&self, buf: &mut [u8]) {
        let t = self.sample_index as f64;
        let adc_t = (519_888.0 + 60_000.0 * (t / 60.0).sin()) as u32;
        let adc_p = (415_148.0 + 30_000.0 * (t / 300.0).sin()) as u32;
        let adc_h = (32_768.0 + 6_000.0 * (t / 90.0).cos()) as u32;

        buf[0] = (adc_p >> 12) as u8;
        buf[1] = (adc_p >> 4) as u8;
        buf[2] = ((adc_p & 0x0F) << 4) as u8;
        buf[3] = (adc_t >> 12) as u8;
        buf[4] = (adc_t >> 4) as u8;
        buf[5] = ((adc_t & 0x0F) << 4) as u8;
        buf[6] = (adc_h >> 8) as u8;
        buf[7] = adc_h as u8;
    }
}

// ---------------------------------------------------------------------------
// SGP30 model
// ---------------------------------------------------------------------------

/// Command-level SGP30 fake: bootstrap window, humidity compensation input
/// and baseline words that drift the way the real algorithm's do.
struct Sgp30Model {
    cmd: [u8; 2],
    samples_since_init: u32,
    eco2_base: u16,
    tvoc_base: u16,
    humidity_q8: u16,
}

impl Sgp30Model {
    fn new() -> Self {
        Self {
            cmd: [0; 2],
            samples_since_init: 0,
            eco2_base: 0x8A3C,
            tvoc_base: 0x8C9B,
            humidity_q8: 0,
        }
    }

    fn handle(&mut self, operations: &mut [i2c::Operation<'_>]) {
        for op in operations {
            match op {
                i2c::Operation::Write(bytes) => self.write(bytes),
                i2c::Operation::Read(buf) => self.read(buf),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if bytes.len() < 2 {
            return;
        }
        self.cmd = [bytes[0], bytes[1]];
        match self.cmd {
            [0x20, 0x03] => {
                self.samples_since_init = 0;
                debug!("sim: sgp30 iaq_init");
            }
            [0x20, 0x08] => self.samples_since_init += 1,
            // argument order on the wire is TVOC first
            [0x20, 0x1E] if bytes.len() >= 8 => {
                self.tvoc_base = u16::from_be_bytes([bytes[2], bytes[3]]);
                self.eco2_base = u16::from_be_bytes([bytes[5], bytes[6]]);
                info!(
                    "sim: sgp30 baseline restored (eCO2=0x{:04X} TVOC=0x{:04X})",
                    self.eco2_base, self.tvoc_base
                );
            }
            [0x20, 0x61] if bytes.len() >= 5 => {
                self.humidity_q8 = u16::from_be_bytes([bytes[2], bytes[3]]);
            }
            _ => {}
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        match self.cmd {
            [0x36, 0x82] => fill_words(buf, &[0x0000, 0x17DE, 0x2B49]),
            [0x20, 0x2F] => fill_words(buf, &[0x0020]),
            [0x20, 0x08] => {
                let (eco2, tvoc) = self.measurement();
                fill_words(buf, &[eco2, tvoc]);
            }
            [0x20, 0x15] => {
                let drift = (self.samples_since_init / 90) as u16;
                fill_words(buf, &[self.eco2_base + drift, self.tvoc_base + drift / 2]);
            }
            _ => buf.fill(0),
        }
    }

    fn measurement(&self) -> (u16, u16) {
        if self.samples_since_init <= AIR_WARMUP_SAMPLES {
            return (400, 0);
        }
        let t = self.samples_since_init as f64;
        // a touch of indoor variation; damp eCO2 slightly when the restored
        // humidity compensation is high, so the input visibly matters
        let damping = f64::from(self.humidity_q8) / 65_536.0;
        let eco2 = 420.0 + 90.0 * ((t / 45.0).sin() + 1.0) / 2.0 - 20.0 * damping;
        let tvoc = 8.0 + 55.0 * ((t / 25.0).sin() + 1.0) / 2.0;
        (eco2 as u16, tvoc as u16)
    }
}

/// CRC-8 (poly 0x31, init 0xFF) as the sensor computes it per word.
fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn fill_words(buf: &mut [u8], words: &[u16]) {
    for (chunk, word) in buf.chunks_mut(3).zip(words) {
        let be = word.to_be_bytes();
        chunk[0] = be[0];
        chunk[1] = be[1];
        if chunk.len() > 2 {
            chunk[2] = crc8(&be);
        }
    }
}

// ---------------------------------------------------------------------------
// Panel wiring
// ---------------------------------------------------------------------------

/// Decoded view of the panel's SPI traffic, shared by all its wires.
#[derive(Debug, Default)]
pub struct PanelState {
    dc_high: bool,
    cmd: u8,
    update_sequence: u8,
    window_x: (u8, u8),
    window_y: (u16, u16),
    pub full_refreshes: u32,
    pub partial_refreshes: u32,
}

impl PanelState {
    fn handle_command(&mut self, cmd: u8) {
        self.cmd = cmd;
        if cmd == 0x20 {
            let cols = u32::from(self.window_x.1 - self.window_x.0) + 1;
            let rows = u32::from(self.window_y.1 - self.window_y.0) + 1;
            match self.update_sequence {
                0xF7 => {
                    self.full_refreshes += 1;
                    info!("sim: panel full refresh #{}", self.full_refreshes);
                }
                0xFF => {
                    self.partial_refreshes += 1;
                    info!(
                        "sim: panel partial refresh #{} ({} x {} byte window)",
                        self.partial_refreshes, cols, rows
                    );
                }
                other => debug!("sim: panel activation with sequence 0x{:02X}", other),
            }
        }
    }

    fn handle_data(&mut self, data: &[u8]) {
        match self.cmd {
            0x22 if !data.is_empty() => self.update_sequence = data[0],
            0x44 if data.len() >= 2 => self.window_x = (data[0], data[1]),
            0x45 if data.len() >= 4 => {
                self.window_y = (
                    u16::from_le_bytes([data[0], data[1]]),
                    u16::from_le_bytes([data[2], data[3]]),
                )
            }
            0x10 => debug!("sim: panel deep sleep"),
            _ => {}
        }
    }

    fn handle_spi(&mut self, bytes: &[u8]) {
        if self.dc_high {
            self.handle_data(bytes);
        } else if let [cmd] = bytes {
            self.handle_command(*cmd);
        }
    }
}

/// SPI wire of the fake panel.
pub struct SimSpi {
    state: Rc<RefCell<PanelState>>,
}

impl SimSpi {
    pub fn new(state: Rc<RefCell<PanelState>>) -> Self {
        Self { state }
    }
}

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiDevice for SimSpi {
    fn transaction(
        &mut self,
        operations: &mut [SpiOperation<'_, u8>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                SpiOperation::Write(bytes) => self.state.borrow_mut().handle_spi(bytes),
                SpiOperation::Read(buf) => buf.fill(0),
                SpiOperation::Transfer(read, _) => read.fill(0),
                SpiOperation::TransferInPlace(buf) => buf.fill(0),
                SpiOperation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}

pub enum PinRole {
    DataCommand,
    Reset,
}

/// Output control line of the fake panel.
pub struct SimPin {
    state: Rc<RefCell<PanelState>>,
    role: PinRole,
}

impl SimPin {
    pub fn new(state: Rc<RefCell<PanelState>>, role: PinRole) -> Self {
        Self { state, role }
    }

    fn set(&mut self, high: bool) {
        match self.role {
            PinRole::DataCommand => self.state.borrow_mut().dc_high = high,
            PinRole::Reset => {
                if high {
                    debug!("sim: panel reset released");
                }
            }
        }
    }
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// BUSY line that is always idle; fake refreshes finish instantly.
pub struct SimBusyPin;

impl embedded_hal::digital::ErrorType for SimBusyPin {
    type Error = Infallible;
}

impl InputPin for SimBusyPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// No-op delay: the models have no real timing to wait out.
pub struct InstantDelay;

impl DelayNs for InstantDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
