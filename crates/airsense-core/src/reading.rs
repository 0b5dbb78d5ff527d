//! Value types shared across the sampling pipeline.
//!
//! All quantities are fixed-point integers so compensation stays exactly
//! reproducible: temperature in centi-degrees Celsius, relative humidity in
//! milli-percent, pressure in pascals. Air quality values carry the sensor's
//! native units (ppm / ppb).

use core::fmt;

/// Lifecycle state of one sensor as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHealth {
    /// Never initialized, or initialization keeps failing.
    Uninitialized,
    /// Initialized but still inside the conditioning window; values are the
    /// sensor's bootstrap constants, not real measurements.
    Warming,
    Ready,
    /// The last measurement cycle failed.
    Fault,
}

impl fmt::Display for SensorHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Warming => "warming",
            Self::Ready => "ready",
            Self::Fault => "fault",
        };
        f.write_str(s)
    }
}

/// One merged measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Monotonic tick index the cycle ran at.
    pub tick: u64,
    pub temperature_centi_c: i32,
    pub humidity_milli_pct: u32,
    pub pressure_pa: u32,
    pub eco2_ppm: u16,
    pub tvoc_ppb: u16,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t_sign = if self.temperature_centi_c < 0 { "-" } else { "" };
        let t = self.temperature_centi_c.unsigned_abs();
        write!(
            f,
            "T = {}{}.{:02} C  P = {}.{:02} hPa  H = {}.{} %RH  eCO2 = {:4} ppm  TVOC = {:4} ppb",
            t_sign,
            t / 100,
            t % 100,
            self.pressure_pa / 100,
            self.pressure_pa % 100,
            self.humidity_milli_pct / 1000,
            (self.humidity_milli_pct % 1000) / 100,
            self.eco2_ppm,
            self.tvoc_ppb,
        )
    }
}

/// Whether a snapshot may be pushed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Both sensors produced data this cycle.
    Fresh,
    /// At least one field is stale or still conditioning.
    Degraded,
    /// Some field has never been measured, nothing sensible to show.
    NotEligible,
}

/// A [`Reading`] joined with the health context it was taken under.
///
/// When a sensor faults for a cycle the snapshot carries its last good
/// values with the matching stale flag set, so the display layer can keep
/// showing data while marking it as old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub reading: Reading,
    pub env_health: SensorHealth,
    pub air_health: SensorHealth,
    /// Temperature, humidity and pressure come from an earlier cycle.
    pub env_stale: bool,
    /// eCO2 and TVOC come from an earlier cycle.
    pub air_stale: bool,
    pub eligibility: Eligibility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_line_format() {
        let reading = Reading {
            tick: 42,
            temperature_centi_c: 2345,
            humidity_milli_pct: 41_200,
            pressure_pa: 101_325,
            eco2_ppm: 412,
            tvoc_ppb: 12,
        };
        assert_eq!(
            format!("{reading}"),
            "T = 23.45 C  P = 1013.25 hPa  H = 41.2 %RH  eCO2 =  412 ppm  TVOC =   12 ppb"
        );
    }

    #[test]
    fn test_reading_line_negative_temperature() {
        let reading = Reading {
            tick: 0,
            temperature_centi_c: -50,
            humidity_milli_pct: 99_900,
            pressure_pa: 98_700,
            eco2_ppm: 400,
            tvoc_ppb: 0,
        };
        let line = format!("{reading}");
        assert!(line.starts_with("T = -0.50 C"), "got {line}");
        assert!(line.contains("H = 99.9 %RH"), "got {line}");
    }
}
