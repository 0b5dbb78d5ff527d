//! Sensirion SGP30 TVOC / eCO2 driver.
//!
//! The SGP30 is a command-based device rather than a register map: each
//! operation is a 16-bit command word, a fixed processing delay, then an
//! optional response of 2-byte words each followed by a CRC-8. Commands that
//! carry arguments append the same word+CRC framing.
//!
//! The on-chip IAQ algorithm needs a strict 1 Hz measurement cadence and
//! returns fixed bootstrap values (400 ppm, 0 ppb) while it warms up. The
//! driver tracks that as a phase: measurements count toward the warm-up and
//! a measurement fault restarts the count, since the algorithm restarts its
//! own accumulation too. A fault after warm-up flags the sensor until the
//! next good measurement.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::bus::{BusError, SensorBus};
use crate::config::DEFAULT_WARMUP_TICKS;
use crate::reading::SensorHealth;
use crate::sensors::SensorError;

// =============================================================================
// I2C Address
// =============================================================================

pub const I2C_ADDR: u8 = 0x58;

// =============================================================================
// Command Words
// =============================================================================

const CMD_GET_SERIAL_ID: [u8; 2] = [0x36, 0x82];
const CMD_GET_FEATURESET: [u8; 2] = [0x20, 0x2F];
const CMD_IAQ_INIT: [u8; 2] = [0x20, 0x03];
const CMD_MEASURE_IAQ: [u8; 2] = [0x20, 0x08];
const CMD_GET_IAQ_BASELINE: [u8; 2] = [0x20, 0x15];
const CMD_SET_IAQ_BASELINE: [u8; 2] = [0x20, 0x1E];
const CMD_SET_ABSOLUTE_HUMIDITY: [u8; 2] = [0x20, 0x61];

/// Feature set words this driver has been verified against.
const FEATURESET_KNOWN: [u16; 2] = [0x0020, 0x0022];

/// Fixed eCO2 output during warm-up, also used as the display placeholder.
pub const BOOTSTRAP_ECO2_PPM: u16 = 400;
/// Fixed TVOC output during warm-up.
pub const BOOTSTRAP_TVOC_PPB: u16 = 0;

// =============================================================================
// Command Timing (datasheet maximums)
// =============================================================================

const DELAY_SERIAL_MS: u32 = 1;
const DELAY_FEATURESET_MS: u32 = 10;
const DELAY_IAQ_INIT_MS: u32 = 10;
const DELAY_MEASURE_MS: u32 = 12;
const DELAY_BASELINE_MS: u32 = 10;
const DELAY_HUMIDITY_MS: u32 = 10;

/// CRC-8 over each 2-byte word: polynomial 0x31, init 0xFF.
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

// =============================================================================
// Measurement Types
// =============================================================================

/// One IAQ measurement. Bootstrap values while the health is `Warming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirMeasurement {
    pub eco2_ppm: u16,
    pub tvoc_ppb: u16,
}

/// Baseline correction words of the on-chip IAQ algorithm.
///
/// Read back periodically and persisted so a restart does not lose the
/// roughly 12 hours of accumulation behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub eco2: u16,
    pub tvoc: u16,
}

impl Baseline {
    /// A baseline word of 0x0000 or 0xFFFF is blank or erased NVM, not a
    /// value the algorithm ever produces.
    pub fn is_plausible(&self) -> bool {
        self.eco2 != 0x0000 && self.eco2 != 0xFFFF && self.tvoc != 0x0000 && self.tvoc != 0xFFFF
    }
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Warming { ticks: u16 },
    Ready,
}

pub struct Sgp30<I2C> {
    bus: SensorBus<I2C>,
    phase: Phase,
    /// Set on a measurement fault after warm-up, cleared by the next success.
    faulted: bool,
    warmup_ticks: u16,
}

impl<I2C: I2c> Sgp30<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_warmup(i2c, DEFAULT_WARMUP_TICKS)
    }

    pub fn with_warmup(i2c: I2C, warmup_ticks: u16) -> Self {
        Self {
            bus: SensorBus::new(i2c, I2C_ADDR),
            phase: Phase::Uninitialized,
            faulted: false,
            warmup_ticks,
        }
    }

    pub fn health(&self) -> SensorHealth {
        match self.phase {
            Phase::Uninitialized => SensorHealth::Uninitialized,
            Phase::Warming { .. } => SensorHealth::Warming,
            Phase::Ready if self.faulted => SensorHealth::Fault,
            Phase::Ready => SensorHealth::Ready,
        }
    }

    /// True until an `init` has succeeded; the scheduler retries lazily.
    pub fn needs_init(&self) -> bool {
        self.phase == Phase::Uninitialized
    }

    /// Probe the chip, start its IAQ algorithm and begin the warm-up.
    ///
    /// A plausible persisted `baseline` is written right after `iaq_init` so
    /// the very first measurement already runs with the restored correction.
    /// The warm-up still applies: restored or not, the first readings are
    /// bootstrap values.
    pub fn init<D: DelayNs>(
        &mut self,
        delay: &mut D,
        baseline: Option<Baseline>,
    ) -> Result<(), SensorError> {
        let mut serial = [0u16; 3];
        self.command_and_read(CMD_GET_SERIAL_ID, DELAY_SERIAL_MS, delay, &mut serial)
            .map_err(|e| match e {
                SensorError::Bus(BusError::NoAcknowledge) => SensorError::SensorUnavailable,
                other => other,
            })?;
        let serial_id = ((serial[0] as u64) << 32) | ((serial[1] as u64) << 16) | serial[2] as u64;

        let mut featureset = [0u16; 1];
        self.command_and_read(
            CMD_GET_FEATURESET,
            DELAY_FEATURESET_MS,
            delay,
            &mut featureset,
        )?;
        if !FEATURESET_KNOWN.contains(&featureset[0]) {
            // unverified firmware revision, keep going anyway
            warn!("SGP30 unknown feature set 0x{:04X}", featureset[0]);
        }

        self.command_with_words(CMD_IAQ_INIT, &[], DELAY_IAQ_INIT_MS, delay)?;

        match baseline {
            Some(b) if b.is_plausible() => {
                self.write_baseline(b, delay)?;
                info!("SGP30 restored baseline eCO2=0x{:04X} TVOC=0x{:04X}", b.eco2, b.tvoc);
            }
            Some(b) => {
                warn!(
                    "SGP30 ignoring implausible baseline eCO2=0x{:04X} TVOC=0x{:04X}",
                    b.eco2, b.tvoc
                );
            }
            None => {}
        }

        self.phase = Phase::Warming { ticks: 0 };
        self.faulted = false;
        info!(
            "SGP30 serial {:012X} initialized, warming up for {} samples",
            serial_id, self.warmup_ticks
        );
        Ok(())
    }

    /// Run one IAQ measurement.
    ///
    /// Successes advance the warm-up counter; the measurement that completes
    /// it is the first one past the bootstrap window, so it already reports
    /// `Ready`. A fault during warm-up restarts the counter. A fault after
    /// warm-up reports `Fault` until the next success.
    pub fn measure<D: DelayNs>(&mut self, delay: &mut D) -> Result<AirMeasurement, SensorError> {
        if self.phase == Phase::Uninitialized {
            return Err(SensorError::SensorUnavailable);
        }

        let mut words = [0u16; 2];
        match self.command_and_read(CMD_MEASURE_IAQ, DELAY_MEASURE_MS, delay, &mut words) {
            Ok(()) => {
                self.faulted = false;
                if let Phase::Warming { ticks } = self.phase {
                    let ticks = ticks + 1;
                    if ticks >= self.warmup_ticks {
                        self.phase = Phase::Ready;
                        info!("SGP30 warm-up complete after {} samples", ticks);
                    } else {
                        self.phase = Phase::Warming { ticks };
                    }
                }
                let measurement = AirMeasurement {
                    eco2_ppm: words[0],
                    tvoc_ppb: words[1],
                };
                debug!("SGP30 {:?}", measurement);
                Ok(measurement)
            }
            Err(e) => {
                match self.phase {
                    // the IAQ accumulation restarts, so does our count
                    Phase::Warming { .. } => self.phase = Phase::Warming { ticks: 0 },
                    Phase::Ready => self.faulted = true,
                    Phase::Uninitialized => {}
                }
                Err(e)
            }
        }
    }

    /// Feed absolute humidity (8.8 fixed-point g/m³) into the IAQ algorithm.
    /// A value of zero disables the compensation.
    pub fn set_humidity_compensation<D: DelayNs>(
        &mut self,
        humidity_q8: u16,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        if self.phase == Phase::Uninitialized {
            return Err(SensorError::SensorUnavailable);
        }
        self.command_with_words(
            CMD_SET_ABSOLUTE_HUMIDITY,
            &[humidity_q8],
            DELAY_HUMIDITY_MS,
            delay,
        )
    }

    /// Read the current baseline words for persistence.
    ///
    /// Only meaningful once warm-up is done; before that the words are
    /// placeholders and saving them would poison the next restore.
    pub fn baseline<D: DelayNs>(&mut self, delay: &mut D) -> Result<Baseline, SensorError> {
        if self.phase != Phase::Ready {
            return Err(SensorError::CalibrationRejected);
        }
        let mut words = [0u16; 2];
        self.command_and_read(CMD_GET_IAQ_BASELINE, DELAY_BASELINE_MS, delay, &mut words)?;
        Ok(Baseline {
            eco2: words[0],
            tvoc: words[1],
        })
    }

    /// Overwrite the algorithm baseline at runtime.
    ///
    /// Rejected during warm-up and for implausible words; restores at boot
    /// go through [`Sgp30::init`] instead.
    pub fn set_baseline<D: DelayNs>(
        &mut self,
        baseline: Baseline,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        if self.phase != Phase::Ready || !baseline.is_plausible() {
            return Err(SensorError::CalibrationRejected);
        }
        self.write_baseline(baseline, delay)
    }

    fn write_baseline<D: DelayNs>(
        &mut self,
        baseline: Baseline,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        // argument order is reversed from the read-back: TVOC word first
        self.command_with_words(
            CMD_SET_IAQ_BASELINE,
            &[baseline.tvoc, baseline.eco2],
            DELAY_BASELINE_MS,
            delay,
        )
    }

    // ---- framing helpers ----

    fn command_and_read<D: DelayNs>(
        &mut self,
        cmd: [u8; 2],
        delay_ms: u32,
        delay: &mut D,
        words: &mut [u16],
    ) -> Result<(), SensorError> {
        self.bus.write(&cmd)?;
        delay.delay_ms(delay_ms);

        let mut frame = [0u8; 9];
        let frame = &mut frame[..words.len() * 3];
        self.bus.read(frame)?;

        for (i, word) in words.iter_mut().enumerate() {
            let chunk = &frame[i * 3..i * 3 + 3];
            if crc8(&chunk[..2]) != chunk[2] {
                return Err(SensorError::Crc);
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(())
    }

    fn command_with_words<D: DelayNs>(
        &mut self,
        cmd: [u8; 2],
        words: &[u16],
        delay_ms: u32,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        let mut frame = [0u8; 8];
        frame[..2].copy_from_slice(&cmd);
        let mut len = 2;
        for word in words {
            let be = word.to_be_bytes();
            frame[len] = be[0];
            frame[len + 1] = be[1];
            frame[len + 2] = crc8(&be);
            len += 3;
        }
        self.bus.write(&frame[..len])?;
        delay.delay_ms(delay_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    /// Encode one response word with its CRC.
    fn word(value: u16) -> Vec<u8> {
        let be = value.to_be_bytes();
        vec![be[0], be[1], crc8(&be)]
    }

    fn words(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|&v| word(v)).collect()
    }

    fn init_transactions() -> Vec<Transaction> {
        vec![
            Transaction::write(I2C_ADDR, CMD_GET_SERIAL_ID.to_vec()),
            Transaction::read(I2C_ADDR, words(&[0x0000, 0x0123, 0x4567])),
            Transaction::write(I2C_ADDR, CMD_GET_FEATURESET.to_vec()),
            Transaction::read(I2C_ADDR, word(0x0020)),
            Transaction::write(I2C_ADDR, CMD_IAQ_INIT.to_vec()),
        ]
    }

    fn measure_transactions(eco2: u16, tvoc: u16) -> Vec<Transaction> {
        vec![
            Transaction::write(I2C_ADDR, CMD_MEASURE_IAQ.to_vec()),
            Transaction::read(I2C_ADDR, words(&[eco2, tvoc])),
        ]
    }

    #[test]
    fn test_crc_matches_datasheet_vector() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_baseline_plausibility() {
        assert!(Baseline { eco2: 0x8973, tvoc: 0x8AAE }.is_plausible());
        assert!(!Baseline { eco2: 0x0000, tvoc: 0x8AAE }.is_plausible());
        assert!(!Baseline { eco2: 0x8973, tvoc: 0xFFFF }.is_plausible());
        assert!(!Baseline { eco2: 0xFFFF, tvoc: 0xFFFF }.is_plausible());
    }

    #[test]
    fn test_init_sequence() {
        let expectations = init_transactions();
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();

        assert_eq!(sensor.health(), SensorHealth::Uninitialized);
        sensor.init(&mut delay, None).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Warming);
        assert!(!sensor.needs_init());

        i2c.done();
    }

    #[test]
    fn test_init_writes_restored_baseline_tvoc_first() {
        let mut expectations = init_transactions();
        // 0x8AAE (TVOC) leads, 0x8973 (eCO2) trails
        let mut frame = CMD_SET_IAQ_BASELINE.to_vec();
        frame.extend(words(&[0x8AAE, 0x8973]));
        expectations.push(Transaction::write(I2C_ADDR, frame));

        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor
            .init(&mut delay, Some(Baseline { eco2: 0x8973, tvoc: 0x8AAE }))
            .unwrap();

        i2c.done();
    }

    #[test]
    fn test_init_skips_implausible_baseline() {
        // no SET_IAQ_BASELINE transaction expected
        let expectations = init_transactions();
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor
            .init(&mut delay, Some(Baseline { eco2: 0x0000, tvoc: 0xFFFF }))
            .unwrap();

        i2c.done();
    }

    #[test]
    fn test_absent_device_is_unavailable() {
        let expectations = [Transaction::write(I2C_ADDR, CMD_GET_SERIAL_ID.to_vec())
            .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();

        assert_eq!(
            sensor.init(&mut delay, None),
            Err(SensorError::SensorUnavailable)
        );
        assert!(sensor.needs_init());

        i2c.done();
    }

    #[test]
    fn test_warmup_counts_successful_measurements() {
        let mut expectations = init_transactions();
        for _ in 0..3 {
            expectations.extend(measure_transactions(400, 0));
        }
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::with_warmup(i2c.clone(), 3);
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        let m = sensor.measure(&mut delay).unwrap();
        assert_eq!(m, AirMeasurement { eco2_ppm: 400, tvoc_ppb: 0 });
        assert_eq!(sensor.health(), SensorHealth::Warming);

        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Warming);

        // third success completes the warm-up
        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Ready);

        i2c.done();
    }

    #[test]
    fn test_default_warmup_completes_at_sample_fifteen() {
        let mut expectations = init_transactions();
        for _ in 0..15 {
            expectations.extend(measure_transactions(400, 0));
        }
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        for sample in 1..15 {
            sensor.measure(&mut delay).unwrap();
            assert_eq!(sensor.health(), SensorHealth::Warming, "sample {sample}");
        }
        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Ready);

        i2c.done();
    }

    #[test]
    fn test_fault_during_warmup_restarts_count() {
        let mut expectations = init_transactions();
        expectations.extend(measure_transactions(400, 0));
        expectations.extend(measure_transactions(400, 0));
        // fault at the third sample
        expectations.push(
            Transaction::write(I2C_ADDR, CMD_MEASURE_IAQ.to_vec())
                .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
        );
        for _ in 0..3 {
            expectations.extend(measure_transactions(400, 0));
        }
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::with_warmup(i2c.clone(), 3);
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        sensor.measure(&mut delay).unwrap();
        sensor.measure(&mut delay).unwrap();
        assert!(sensor.measure(&mut delay).is_err());
        // still warming, but the count restarted
        assert_eq!(sensor.health(), SensorHealth::Warming);

        sensor.measure(&mut delay).unwrap();
        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Warming);
        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Ready);

        i2c.done();
    }

    #[test]
    fn test_fault_after_warmup_clears_on_next_success() {
        let mut expectations = init_transactions();
        expectations.extend(measure_transactions(400, 0));
        expectations.push(
            Transaction::write(I2C_ADDR, CMD_MEASURE_IAQ.to_vec())
                .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
        );
        expectations.extend(measure_transactions(412, 19));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::with_warmup(i2c.clone(), 1);
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        sensor.measure(&mut delay).unwrap();
        assert_eq!(sensor.health(), SensorHealth::Ready);

        assert!(sensor.measure(&mut delay).is_err());
        assert_eq!(sensor.health(), SensorHealth::Fault);

        let m = sensor.measure(&mut delay).unwrap();
        assert_eq!(m, AirMeasurement { eco2_ppm: 412, tvoc_ppb: 19 });
        assert_eq!(sensor.health(), SensorHealth::Ready);

        i2c.done();
    }

    #[test]
    fn test_measure_crc_failure() {
        let mut expectations = init_transactions();
        let mut frame = words(&[400, 0]);
        frame[2] ^= 0xFF; // corrupt the eCO2 crc
        expectations.push(Transaction::write(I2C_ADDR, CMD_MEASURE_IAQ.to_vec()));
        expectations.push(Transaction::read(I2C_ADDR, frame));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        assert_eq!(sensor.measure(&mut delay), Err(SensorError::Crc));

        i2c.done();
    }

    #[test]
    fn test_set_baseline_rejected_during_warmup() {
        // no bus traffic for the rejected call
        let expectations = init_transactions();
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        assert_eq!(
            sensor.set_baseline(Baseline { eco2: 0x8973, tvoc: 0x8AAE }, &mut delay),
            Err(SensorError::CalibrationRejected)
        );

        i2c.done();
    }

    #[test]
    fn test_baseline_readback_requires_ready() {
        let mut expectations = init_transactions();
        expectations.extend(measure_transactions(400, 0));
        expectations.push(Transaction::write(I2C_ADDR, CMD_GET_IAQ_BASELINE.to_vec()));
        expectations.push(Transaction::read(I2C_ADDR, words(&[0x8973, 0x8AAE])));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::with_warmup(i2c.clone(), 1);
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        // rejected while warming, no bus traffic
        assert_eq!(
            sensor.baseline(&mut delay),
            Err(SensorError::CalibrationRejected)
        );

        sensor.measure(&mut delay).unwrap();
        let baseline = sensor.baseline(&mut delay).unwrap();
        assert_eq!(baseline, Baseline { eco2: 0x8973, tvoc: 0x8AAE });

        i2c.done();
    }

    #[test]
    fn test_humidity_compensation_frame() {
        let mut expectations = init_transactions();
        let mut frame = CMD_SET_ABSOLUTE_HUMIDITY.to_vec();
        frame.extend(word(0x0BA0)); // 11.625 g/m³
        expectations.push(Transaction::write(I2C_ADDR, frame));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();
        sensor.init(&mut delay, None).unwrap();

        sensor.set_humidity_compensation(0x0BA0, &mut delay).unwrap();

        i2c.done();
    }

    #[test]
    fn test_measure_before_init_is_unavailable() {
        let mut i2c = I2cMock::new(&[]);
        let mut sensor = Sgp30::new(i2c.clone());
        let mut delay = NoopDelay::new();

        assert_eq!(
            sensor.measure(&mut delay),
            Err(SensorError::SensorUnavailable)
        );

        i2c.done();
    }
}
