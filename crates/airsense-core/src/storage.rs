//! Baseline persistence.
//!
//! The SGP30 loses about 12 hours of self-calibration at every power cycle
//! unless its baseline words are saved and restored. The record format is a
//! small versioned postcard struct; where it lives is behind the
//! [`BaselineStore`] trait so firmware can point it at NVM while tests and
//! the simulator use [`MemoryStore`].
//!
//! Decoding is deliberately paranoid: a record from a previous firmware
//! version, erased flash or a torn write must never reach the sensor, so
//! everything funnels through [`BaselineRecord::is_plausible`] before use.

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::sgp30::Baseline;

/// Upper bound of one encoded record; backing stores size slots with it.
pub const RECORD_BYTES: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The record does not fit its slot.
    #[error("record does not fit the backing store")]
    Encode,
    /// The stored bytes are not a valid record.
    #[error("stored bytes are not a valid record")]
    Decode,
}

/// Versioned persistence form of the sensor baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    version: u8,
    eco2_base: u16,
    tvoc_base: u16,
}

impl BaselineRecord {
    pub const VERSION: u8 = 1;

    pub fn new(baseline: Baseline) -> Self {
        Self {
            version: Self::VERSION,
            eco2_base: baseline.eco2,
            tvoc_base: baseline.tvoc,
        }
    }

    pub fn baseline(&self) -> Baseline {
        Baseline {
            eco2: self.eco2_base,
            tvoc: self.tvoc_base,
        }
    }

    /// A record is only restored when its version matches and the words are
    /// values the algorithm could actually have produced.
    pub fn is_plausible(&self) -> bool {
        self.version == Self::VERSION && self.baseline().is_plausible()
    }
}

/// Encode a record into `buf`, returning the used length.
pub fn encode(record: &BaselineRecord, buf: &mut [u8]) -> Result<usize, StorageError> {
    let used = postcard::to_slice(record, buf).map_err(|_| StorageError::Encode)?;
    Ok(used.len())
}

/// Decode a record from stored bytes.
pub fn decode(bytes: &[u8]) -> Result<BaselineRecord, StorageError> {
    let record = postcard::from_bytes(bytes).map_err(|_| StorageError::Decode)?;
    debug!("decoded baseline record {:?}", record);
    Ok(record)
}

/// Where the encoded record lives.
pub trait BaselineStore {
    type Error: core::fmt::Debug;

    /// Read the stored record bytes into `buf`; `None` when nothing is
    /// stored yet.
    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    /// Replace the stored record.
    fn save(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// RAM-backed store for tests and the simulator.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Option<heapless::Vec<u8, RECORD_BYTES>>,
}

impl MemoryStore {
    pub const fn new() -> Self {
        Self { record: None }
    }

    /// A store seeded with existing record bytes, as if a previous run had
    /// saved them.
    pub fn with_record(bytes: &[u8]) -> Self {
        Self {
            record: heapless::Vec::from_slice(bytes).ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }
}

impl BaselineStore for MemoryStore {
    type Error = StorageError;

    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        match &self.record {
            Some(bytes) => {
                if buf.len() < bytes.len() {
                    return Err(StorageError::Decode);
                }
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(Some(bytes.len()))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.record = Some(heapless::Vec::from_slice(bytes).map_err(|_| StorageError::Encode)?);
        Ok(())
    }
}
