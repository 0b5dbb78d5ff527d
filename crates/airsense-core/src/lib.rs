//! Hardware-independent core library for the airsense environmental monitor.
//!
//! This crate contains all platform-agnostic logic for the device: register
//! level drivers for the BME280 environmental sensor and the SGP30 air
//! quality sensor, the per-tick sampling scheduler that joins their readings,
//! a partial-refresh controller for an SSD1680-class e-paper panel, and the
//! station orchestrator that ties them to a persisted calibration baseline.
//!
//! Everything is written against the blocking `embedded-hal` 1.0 traits so it
//! compiles for embedded targets and desktop hosts (for the simulator and
//! tests) alike. `std` is only linked when running the test suite.

#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod config;
pub mod display;
pub mod reading;
pub mod sampler;
pub mod sensors;
pub mod station;
pub mod storage;
