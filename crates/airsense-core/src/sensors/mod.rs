//! Register-level sensor drivers.

pub mod bme280;
pub mod sgp30;

use thiserror_no_std::Error;

use crate::bus::BusError;

/// Failure modes shared by both sensor drivers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Transport-level fault, already classified by the bus layer.
    #[error("bus transport: {0}")]
    Bus(BusError),
    /// Device absent, not acknowledging, or reporting a foreign chip id.
    #[error("device absent or not responding")]
    SensorUnavailable,
    /// A triggered measurement did not complete within its deadline.
    #[error("measurement did not complete in time")]
    MeasurementTimeout,
    /// A response frame failed its CRC check.
    #[error("response failed crc check")]
    Crc,
    /// A calibration payload was rejected (not ready, or implausible values).
    #[error("calibration payload rejected")]
    CalibrationRejected,
}

impl From<BusError> for SensorError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}
