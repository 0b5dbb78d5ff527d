//! SSD1680-class panel controller over 4-wire SPI.
//!
//! The panel is bistable, so the driver's lifecycle is wake, write RAM,
//! trigger a refresh waveform, deep-sleep. Deep sleep kills the charge pump
//! between updates; glass content survives it and the next wake is a reset
//! pulse followed by re-sending the static configuration.
//!
//! The controller keeps two frame RAMs. A partial waveform diffs the B/W RAM
//! against the "previous image" RAM, so after every partial refresh the
//! written window is copied into the previous-image RAM as well, keeping it
//! coherent with the glass.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use log::debug;

use crate::bus::BusError;
use crate::display::frame::{FrameBuffer, NATIVE_HEIGHT, Region};
use crate::display::{DisplayError, PanelDriver, Ram, RefreshKind};

// =============================================================================
// Command Set
// =============================================================================

const CMD_DRIVER_OUTPUT_CONTROL: u8 = 0x01;
const CMD_DEEP_SLEEP_MODE: u8 = 0x10;
const CMD_DATA_ENTRY_MODE: u8 = 0x11;
const CMD_SW_RESET: u8 = 0x12;
const CMD_TEMP_SENSOR_CONTROL: u8 = 0x18;
const CMD_MASTER_ACTIVATION: u8 = 0x20;
const CMD_DISPLAY_UPDATE_CONTROL2: u8 = 0x22;
const CMD_WRITE_RAM_BW: u8 = 0x24;
const CMD_WRITE_RAM_PREVIOUS: u8 = 0x26;
const CMD_BORDER_WAVEFORM: u8 = 0x3C;
const CMD_SET_RAM_X_RANGE: u8 = 0x44;
const CMD_SET_RAM_Y_RANGE: u8 = 0x45;
const CMD_SET_RAM_X_COUNTER: u8 = 0x4E;
const CMD_SET_RAM_Y_COUNTER: u8 = 0x4F;

/// Deep sleep mode 1: controller RAM is lost, glass content is retained.
const DEEP_SLEEP_MODE_1: u8 = 0x01;
/// Address counter advances x then y, both incrementing.
const DATA_ENTRY_X_INC_Y_INC: u8 = 0x03;
const TEMP_SENSOR_INTERNAL: u8 = 0x80;
/// Border follows VBD level, keeps the frame edge white.
const BORDER_LEVEL: u8 = 0x05;
/// Display update sequence: full waveform with temperature load.
const UPDATE_SEQUENCE_FULL: u8 = 0xF7;
/// Display update sequence: partial (differential) waveform.
const UPDATE_SEQUENCE_PARTIAL: u8 = 0xFF;

// =============================================================================
// Timing
// =============================================================================

const RESET_PULSE_MS: u32 = 10;
const BUSY_POLL_MS: u32 = 1;
/// A full refresh takes about 3.5 s; anything past this is a wedged panel.
const BUSY_TIMEOUT_MS: u32 = 5_000;

fn spi_err<E: embedded_hal::spi::Error>(e: E) -> DisplayError {
    DisplayError::WriteFailure(BusError::from_spi(e))
}

fn pin_err<E: embedded_hal::digital::Error>(e: E) -> DisplayError {
    DisplayError::WriteFailure(BusError::from_pin(e))
}

pub struct Panel<SPI, DC, RST, BUSY, D> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    delay: D,
}

impl<SPI, DC, RST, BUSY, D> Panel<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, delay: D) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            delay,
        }
    }

    fn command(&mut self, cmd: u8) -> Result<(), DisplayError> {
        self.dc.set_low().map_err(pin_err)?;
        self.spi.write(&[cmd]).map_err(spi_err)
    }

    fn data(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        self.dc.set_high().map_err(pin_err)?;
        self.spi.write(data).map_err(spi_err)
    }

    fn command_with_data(&mut self, cmd: u8, data: &[u8]) -> Result<(), DisplayError> {
        self.command(cmd)?;
        self.data(data)
    }

    /// The BUSY line is high for the whole refresh waveform.
    fn wait_while_busy(&mut self) -> Result<(), DisplayError> {
        let mut waited_ms = 0;
        while self.busy.is_high().map_err(pin_err)? {
            if waited_ms >= BUSY_TIMEOUT_MS {
                return Err(DisplayError::BusyTimeout);
            }
            self.delay.delay_ms(BUSY_POLL_MS);
            waited_ms += BUSY_POLL_MS;
        }
        Ok(())
    }

    /// Point the RAM window and address counters at `region`.
    fn set_window(&mut self, region: &Region) -> Result<(), DisplayError> {
        let [y0_lo, y0_hi] = region.y0.to_le_bytes();
        let [y1_lo, y1_hi] = region.y1.to_le_bytes();
        self.command_with_data(CMD_SET_RAM_X_RANGE, &[region.byte_x0, region.byte_x1])?;
        self.command_with_data(CMD_SET_RAM_Y_RANGE, &[y0_lo, y0_hi, y1_lo, y1_hi])?;
        self.command_with_data(CMD_SET_RAM_X_COUNTER, &[region.byte_x0])?;
        self.command_with_data(CMD_SET_RAM_Y_COUNTER, &[y0_lo, y0_hi])
    }
}

impl<SPI, DC, RST, BUSY, D> PanelDriver for Panel<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
{
    fn wake(&mut self) -> Result<(), DisplayError> {
        self.rst.set_low().map_err(pin_err)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.rst.set_high().map_err(pin_err)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.wait_while_busy()?;

        self.command(CMD_SW_RESET)?;
        self.wait_while_busy()?;

        // static configuration, lost on every deep sleep
        let [gates_lo, gates_hi] = ((NATIVE_HEIGHT - 1) as u16).to_le_bytes();
        self.command_with_data(CMD_DRIVER_OUTPUT_CONTROL, &[gates_lo, gates_hi, 0x00])?;
        self.command_with_data(CMD_DATA_ENTRY_MODE, &[DATA_ENTRY_X_INC_Y_INC])?;
        self.command_with_data(CMD_BORDER_WAVEFORM, &[BORDER_LEVEL])?;
        self.command_with_data(CMD_TEMP_SENSOR_CONTROL, &[TEMP_SENSOR_INTERNAL])?;
        debug!("panel awake");
        Ok(())
    }

    fn write_ram(
        &mut self,
        ram: Ram,
        frame: &FrameBuffer,
        region: Region,
    ) -> Result<(), DisplayError> {
        self.set_window(&region)?;
        let cmd = match ram {
            Ram::BlackWhite => CMD_WRITE_RAM_BW,
            Ram::Previous => CMD_WRITE_RAM_PREVIOUS,
        };
        self.command(cmd)?;
        for y in region.y0..=region.y1 {
            self.data(frame.row_slice(y, &region))?;
        }
        Ok(())
    }

    fn refresh(&mut self, kind: RefreshKind) -> Result<(), DisplayError> {
        let sequence = match kind {
            RefreshKind::Full => UPDATE_SEQUENCE_FULL,
            RefreshKind::Partial => UPDATE_SEQUENCE_PARTIAL,
        };
        self.command_with_data(CMD_DISPLAY_UPDATE_CONTROL2, &[sequence])?;
        self.command(CMD_MASTER_ACTIVATION)?;
        self.wait_while_busy()
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        debug!("panel entering deep sleep");
        self.command_with_data(CMD_DEEP_SLEEP_MODE, &[DEEP_SLEEP_MODE_1])
    }
}
