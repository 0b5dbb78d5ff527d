//! Bosch BME280 temperature / humidity / pressure driver.
//!
//! Runs the sensor in forced mode with x1 oversampling and the IIR filter
//! off, the configuration Bosch recommends for weather-station duty cycles.
//! Every measurement is a trigger, a bounded status poll, and one burst read
//! of the whole data block so all three values belong to the same
//! measurement instance.
//!
//! Compensation uses the datasheet's integer formulas. Temperature is
//! computed first because its `t_fine` carry feeds both the pressure and
//! humidity compensation.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::bus::{BusError, SensorBus};
use crate::reading::SensorHealth;
use crate::sensors::SensorError;

// =============================================================================
// I2C Address
// =============================================================================

/// Primary BME280 address (SDO low).
pub const I2C_ADDR_PRIMARY: u8 = 0x76;
/// Secondary BME280 address (SDO high).
pub const I2C_ADDR_SECONDARY: u8 = 0x77;

/// Contents of the ID register for a genuine BME280.
pub const CHIP_ID: u8 = 0x60;

// =============================================================================
// Register Addresses
// =============================================================================

const REG_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
/// Start of the pressure/temperature/humidity burst (0xF7..=0xFE).
const REG_DATA_START: u8 = 0xF7;
/// First calibration block, 0x88..=0xA1 (temperature, pressure, dig_H1).
const REG_CALIB_BLOCK0: u8 = 0x88;
/// Second calibration block, 0xE1..=0xE7 (remaining humidity words).
const REG_CALIB_BLOCK1: u8 = 0xE1;

const RESET_MAGIC: u8 = 0xB6;
/// STATUS bit 3: conversion in progress.
const STATUS_MEASURING: u8 = 0x08;
/// STATUS bit 0: NVM calibration copy in progress after reset.
const STATUS_IM_UPDATE: u8 = 0x01;

const MODE_FORCED: u8 = 0b01;
const OSRS_X1: u8 = 0b001;

// =============================================================================
// Timing
// =============================================================================

/// Startup time after soft reset before registers are accessible.
const STARTUP_DELAY_MS: u32 = 2;
/// Bounded polls for the post-reset calibration copy.
const NVM_COPY_POLLS: u32 = 10;
/// Worst-case x1-oversampling conversion is under 10 ms.
const MEASURE_TIMEOUT_MS: u32 = 40;
const MEASURE_POLL_MS: u32 = 2;

// =============================================================================
// Calibration
// =============================================================================

/// Factory trimming coefficients, read once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationCoefficients {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
    dig_h1: u8,
    dig_h2: i16,
    dig_h3: u8,
    dig_h4: i16,
    dig_h5: i16,
    dig_h6: i8,
}

impl CalibrationCoefficients {
    /// Decode the two raw calibration blocks.
    ///
    /// Everything is little-endian except dig_H4/dig_H5, which interleave
    /// their low nibbles in byte 4 of the second block.
    fn parse(block0: &[u8; 26], block1: &[u8; 7]) -> Self {
        let le16 = |lo: u8, hi: u8| i16::from_le_bytes([lo, hi]);
        Self {
            dig_t1: u16::from_le_bytes([block0[0], block0[1]]),
            dig_t2: le16(block0[2], block0[3]),
            dig_t3: le16(block0[4], block0[5]),
            dig_p1: u16::from_le_bytes([block0[6], block0[7]]),
            dig_p2: le16(block0[8], block0[9]),
            dig_p3: le16(block0[10], block0[11]),
            dig_p4: le16(block0[12], block0[13]),
            dig_p5: le16(block0[14], block0[15]),
            dig_p6: le16(block0[16], block0[17]),
            dig_p7: le16(block0[18], block0[19]),
            dig_p8: le16(block0[20], block0[21]),
            dig_p9: le16(block0[22], block0[23]),
            dig_h1: block0[25],
            dig_h2: le16(block1[0], block1[1]),
            dig_h3: block1[2],
            dig_h4: ((block1[3] as i8 as i16) << 4) | (block1[4] & 0x0F) as i16,
            dig_h5: ((block1[5] as i8 as i16) << 4) | (block1[4] >> 4) as i16,
            dig_h6: block1[6] as i8,
        }
    }

    /// Temperature in centi-degrees Celsius plus the `t_fine` carry.
    pub fn compensate_temperature(&self, adc_t: i32) -> (i32, i32) {
        let var1 = (((adc_t >> 3) - ((self.dig_t1 as i32) << 1)) * (self.dig_t2 as i32)) >> 11;
        let delta = (adc_t >> 4) - (self.dig_t1 as i32);
        let var2 = (((delta * delta) >> 12) * (self.dig_t3 as i32)) >> 14;
        let t_fine = var1 + var2;
        ((t_fine * 5 + 128) >> 8, t_fine)
    }

    /// Pressure in pascals (64-bit variant of the datasheet formula).
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> u32 {
        let var1 = (t_fine as i64) - 128_000;
        let mut var2 = var1 * var1 * (self.dig_p6 as i64);
        var2 += (var1 * (self.dig_p5 as i64)) << 17;
        var2 += (self.dig_p4 as i64) << 35;
        let var1 =
            ((var1 * var1 * (self.dig_p3 as i64)) >> 8) + ((var1 * (self.dig_p2 as i64)) << 12);
        let var1 = (((1_i64 << 47) + var1) * (self.dig_p1 as i64)) >> 33;
        if var1 == 0 {
            // would divide by zero; only possible with blank calibration
            return 0;
        }
        let p = 1_048_576 - (adc_p as i64);
        let p = (((p << 31) - var2) * 3125) / var1;
        let var1 = ((self.dig_p9 as i64) * (p >> 13) * (p >> 13)) >> 25;
        let var2 = ((self.dig_p8 as i64) * p) >> 19;
        let p = ((p + var1 + var2) >> 8) + ((self.dig_p7 as i64) << 4);
        // p is Q24.8 pascals
        ((p + 128) >> 8) as u32
    }

    /// Relative humidity in milli-percent.
    pub fn compensate_humidity(&self, adc_h: i32, t_fine: i32) -> u32 {
        let v = t_fine - 76_800;
        let a = ((adc_h << 14) - ((self.dig_h4 as i32) << 20) - ((self.dig_h5 as i32) * v)
            + 16_384)
            >> 15;
        let b = (((((((v * (self.dig_h6 as i32)) >> 10)
            * (((v * (self.dig_h3 as i32)) >> 11) + 32_768))
            >> 10)
            + 2_097_152)
            * (self.dig_h2 as i32))
            + 8_192)
            >> 14;
        let v = a * b;
        let v = v - (((((v >> 15) * (v >> 15)) >> 7) * (self.dig_h1 as i32)) >> 4);
        let v = v.clamp(0, 419_430_400);
        // Q22.10 percent, rescaled to milli-percent
        (((v >> 12) as u32) * 1000) >> 10
    }
}

// =============================================================================
// Measurement
// =============================================================================

/// One compensated environmental measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMeasurement {
    pub temperature_centi_c: i32,
    pub humidity_milli_pct: u32,
    pub pressure_pa: u32,
}

// =============================================================================
// Driver
// =============================================================================

pub struct Bme280<I2C> {
    bus: SensorBus<I2C>,
    calibration: Option<CalibrationCoefficients>,
    health: SensorHealth,
}

impl<I2C: I2c> Bme280<I2C> {
    /// Create a driver at the primary address (0x76).
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, I2C_ADDR_PRIMARY)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            bus: SensorBus::new(i2c, address),
            calibration: None,
            health: SensorHealth::Uninitialized,
        }
    }

    pub fn health(&self) -> SensorHealth {
        self.health
    }

    /// True until an `init` has succeeded; the scheduler retries lazily.
    pub fn needs_init(&self) -> bool {
        self.calibration.is_none()
    }

    pub fn calibration(&self) -> Option<&CalibrationCoefficients> {
        self.calibration.as_ref()
    }

    /// Probe the chip, soft-reset it and load the calibration coefficients.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), SensorError> {
        let id = self.bus.read_reg(REG_ID).map_err(|e| match e {
            BusError::NoAcknowledge => SensorError::SensorUnavailable,
            other => SensorError::Bus(other),
        })?;
        if id != CHIP_ID {
            warn!(
                "unexpected chip id 0x{:02X} at address 0x{:02X}",
                id,
                self.bus.address()
            );
            return Err(SensorError::SensorUnavailable);
        }

        self.bus.write_reg(REG_RESET, RESET_MAGIC)?;
        delay.delay_ms(STARTUP_DELAY_MS);

        // Calibration is copied from NVM after reset; bit 0 clears when done.
        let mut polls = 0;
        while self.bus.read_reg(REG_STATUS)? & STATUS_IM_UPDATE != 0 {
            polls += 1;
            if polls > NVM_COPY_POLLS {
                return Err(SensorError::MeasurementTimeout);
            }
            delay.delay_ms(1);
        }

        let mut block0 = [0u8; 26];
        self.bus.read_regs(REG_CALIB_BLOCK0, &mut block0)?;
        let mut block1 = [0u8; 7];
        self.bus.read_regs(REG_CALIB_BLOCK1, &mut block1)?;

        // osrs_h only latches on the next CTRL_MEAS write, so set it first.
        self.bus.write_reg(REG_CTRL_HUM, OSRS_X1)?;
        self.bus.write_reg(REG_CONFIG, 0x00)?;

        self.calibration = Some(CalibrationCoefficients::parse(&block0, &block1));
        self.health = SensorHealth::Ready;
        info!("BME280 initialized at 0x{:02X}", self.bus.address());
        Ok(())
    }

    /// Trigger one forced-mode conversion and read it back.
    ///
    /// A failure marks the sensor `Fault` for this cycle; the next
    /// successful measurement returns it to `Ready`.
    pub fn measure<D: DelayNs>(&mut self, delay: &mut D) -> Result<EnvMeasurement, SensorError> {
        let Some(calibration) = self.calibration else {
            return Err(SensorError::SensorUnavailable);
        };
        match self.measure_inner(&calibration, delay) {
            Ok(m) => {
                self.health = SensorHealth::Ready;
                Ok(m)
            }
            Err(e) => {
                self.health = SensorHealth::Fault;
                Err(e)
            }
        }
    }

    fn measure_inner<D: DelayNs>(
        &mut self,
        calibration: &CalibrationCoefficients,
        delay: &mut D,
    ) -> Result<EnvMeasurement, SensorError> {
        self.bus
            .write_reg(REG_CTRL_MEAS, (OSRS_X1 << 5) | (OSRS_X1 << 2) | MODE_FORCED)?;

        let mut waited_ms = 0;
        loop {
            let status = self.bus.read_reg(REG_STATUS)?;
            if status & STATUS_MEASURING == 0 {
                break;
            }
            if waited_ms >= MEASURE_TIMEOUT_MS {
                return Err(SensorError::MeasurementTimeout);
            }
            delay.delay_ms(MEASURE_POLL_MS);
            waited_ms += MEASURE_POLL_MS;
        }

        // One burst so pressure, temperature and humidity belong to the same
        // measurement instance.
        let mut data = [0u8; 8];
        self.bus.read_regs(REG_DATA_START, &mut data)?;

        let adc_p = ((data[0] as i32) << 12) | ((data[1] as i32) << 4) | ((data[2] as i32) >> 4);
        let adc_t = ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);
        let adc_h = ((data[6] as i32) << 8) | (data[7] as i32);

        let (temperature_centi_c, t_fine) = calibration.compensate_temperature(adc_t);
        let measurement = EnvMeasurement {
            temperature_centi_c,
            humidity_milli_pct: calibration.compensate_humidity(adc_h, t_fine),
            pressure_pa: calibration.compensate_pressure(adc_p, t_fine),
        };
        debug!(
            "BME280 raw t={} p={} h={} -> {:?}",
            adc_t, adc_p, adc_h, measurement
        );
        Ok(measurement)
    }
}
