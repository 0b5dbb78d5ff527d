//! Two-wire transport shared by both sensors.
//!
//! Thin byte-level primitives over one addressed I²C device. Each call maps
//! to a single bus transaction, so a register burst is atomic from the
//! driver's point of view. Faults are classified into [`BusError`] at this
//! boundary; drivers decide what a fault means for sensor health, and no
//! retries happen here.

use core::cell::RefCell;

use embedded_hal::i2c::{Error as I2cErrorTrait, ErrorKind as I2cErrorKind, I2c};
use embedded_hal_bus::i2c::RefCellDevice;
use log::debug;
use thiserror_no_std::Error;

/// Transport fault, reduced to the classes the drivers react to.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// A transaction or bounded wait exceeded its deadline.
    #[error("bus transaction deadline exceeded")]
    Timeout,
    /// The device did not acknowledge its address or a data byte.
    #[error("device did not acknowledge")]
    NoAcknowledge,
    /// Any other transport fault (arbitration loss, framing, HAL-specific).
    #[error("bus fault")]
    Other,
}

impl BusError {
    /// Classify an `embedded-hal` I²C error.
    pub fn from_i2c<E: I2cErrorTrait>(err: E) -> Self {
        let classified = match err.kind() {
            I2cErrorKind::NoAcknowledge(_) => Self::NoAcknowledge,
            _ => Self::Other,
        };
        debug!("i2c fault {:?} -> {}", err, classified);
        classified
    }

    /// Classify an `embedded-hal` SPI error.
    pub fn from_spi<E: embedded_hal::spi::Error>(err: E) -> Self {
        debug!("spi fault {:?}", err);
        Self::Other
    }

    /// Classify a GPIO error from a display control line.
    pub fn from_pin<E: embedded_hal::digital::Error>(err: E) -> Self {
        debug!("pin fault {:?}", err);
        Self::Other
    }
}

/// One addressed device on the shared two-wire bus.
pub struct SensorBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> SensorBus<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Write a single byte to a register.
    pub fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(BusError::from_i2c)
    }

    /// Read a single register byte.
    pub fn read_reg(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read_regs(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// Burst-read consecutive registers starting at `reg` in one transaction.
    pub fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(BusError::from_i2c)
    }

    /// Write a raw frame (command word plus any argument bytes).
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.i2c
            .write(self.address, bytes)
            .map_err(BusError::from_i2c)
    }

    /// Read a raw response frame.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.i2c
            .read(self.address, buf)
            .map_err(BusError::from_i2c)
    }
}

/// Split one I²C peripheral into two independently owned device handles.
///
/// Both sensors live on the same physical bus; the `RefCell` arbitration is
/// enough because the sampling model is single-threaded and cooperative.
pub fn shared<I2C: I2c>(
    bus: &RefCell<I2C>,
) -> (RefCellDevice<'_, I2C>, RefCellDevice<'_, I2C>) {
    (RefCellDevice::new(bus), RefCellDevice::new(bus))
}
