//! Per-tick measurement scheduler.
//!
//! One `sample` call runs a full measurement cycle: environmental sensor
//! first, then its fresh humidity is fed into the air sensor's compensation,
//! then the air sensor is measured. The air measurement always runs, even
//! when the environmental side failed this tick, because skipping samples
//! would disturb the SGP30's 1 Hz accumulation far more than a missing
//! humidity update does.
//!
//! Initialization is lazy. A sensor that fails to come up is retried at the
//! start of every cycle, so a device that is absent at boot starts
//! contributing as soon as it appears, and the other sensor is never held
//! back by it.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use libm::expf;
use log::{debug, warn};

use crate::reading::{Eligibility, Reading, SensorHealth, Snapshot};
use crate::sensors::SensorError;
use crate::sensors::bme280::{Bme280, EnvMeasurement};
use crate::sensors::sgp30::{
    AirMeasurement, BOOTSTRAP_ECO2_PPM, BOOTSTRAP_TVOC_PPB, Baseline, Sgp30,
};

/// Absolute humidity in 8.8 fixed-point g/m³, the SGP30's compensation unit.
///
/// Magnus form over water; fine for the indoor range the station lives in.
pub fn absolute_humidity_q8(temperature_centi_c: i32, humidity_milli_pct: u32) -> u16 {
    let t = temperature_centi_c as f32 / 100.0;
    let rh = humidity_milli_pct as f32 / 1000.0;
    let svp_hpa = 6.112 * expf(17.62 * t / (243.12 + t));
    let ah = 216.7 * (rh / 100.0 * svp_hpa) / (273.15 + t);
    let q8 = ah * 256.0;
    if q8 <= 0.0 {
        0
    } else if q8 >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        q8 as u16
    }
}

pub struct Sampler<E, A> {
    env: Bme280<E>,
    air: Sgp30<A>,
    /// Baseline restored from storage, consumed by the first successful
    /// air-sensor init.
    pending_baseline: Option<Baseline>,
    last_env: Option<EnvMeasurement>,
    last_air: Option<AirMeasurement>,
}

impl<E: I2c, A: I2c> Sampler<E, A> {
    pub fn new(env: Bme280<E>, air: Sgp30<A>) -> Self {
        Self {
            env,
            air,
            pending_baseline: None,
            last_env: None,
            last_air: None,
        }
    }

    /// Offer a persisted baseline for the air sensor's boot init.
    ///
    /// Ignored once the sensor is up: a runtime restore would fight the
    /// algorithm's own accumulated correction.
    pub fn restore_baseline(&mut self, baseline: Baseline) {
        if self.air.needs_init() {
            self.pending_baseline = Some(baseline);
        }
    }

    pub fn env_health(&self) -> SensorHealth {
        self.env.health()
    }

    pub fn air_health(&self) -> SensorHealth {
        self.air.health()
    }

    /// Read back the air baseline for persistence.
    pub fn air_baseline<D: DelayNs>(&mut self, delay: &mut D) -> Result<Baseline, SensorError> {
        self.air.baseline(delay)
    }

    /// Run one measurement cycle and merge it into a snapshot.
    ///
    /// Never fails: sensor errors degrade the snapshot instead.
    pub fn sample<D: DelayNs>(&mut self, tick: u64, delay: &mut D) -> Snapshot {
        // ---- environmental side ----
        if self.env.needs_init() {
            if let Err(e) = self.env.init(delay) {
                warn!("BME280 init failed: {}", e);
            }
        }
        let mut env_fresh = false;
        if !self.env.needs_init() {
            match self.env.measure(delay) {
                Ok(m) => {
                    self.last_env = Some(m);
                    env_fresh = true;
                }
                Err(e) => warn!("BME280 measurement failed: {}", e),
            }
        }

        // ---- air quality side ----
        if self.air.needs_init() {
            match self.air.init(delay, self.pending_baseline) {
                Ok(()) => self.pending_baseline = None,
                Err(e) => warn!("SGP30 init failed: {}", e),
            }
        }
        let mut air_fresh = false;
        if !self.air.needs_init() {
            if env_fresh {
                if let Some(env) = self.last_env {
                    // update compensation first so this tick's IAQ run uses it
                    let ah = absolute_humidity_q8(env.temperature_centi_c, env.humidity_milli_pct);
                    if let Err(e) = self.air.set_humidity_compensation(ah, delay) {
                        warn!("SGP30 humidity compensation failed: {}", e);
                    }
                }
            }
            match self.air.measure(delay) {
                Ok(m) => {
                    self.last_air = Some(m);
                    air_fresh = true;
                }
                Err(e) => warn!("SGP30 measurement failed: {}", e),
            }
        }

        let snapshot = self.snapshot(tick, env_fresh, air_fresh);
        debug!("tick {} {:?}", tick, snapshot.eligibility);
        snapshot
    }

    fn snapshot(&self, tick: u64, env_fresh: bool, air_fresh: bool) -> Snapshot {
        let eligibility = if self.last_env.is_none() || self.last_air.is_none() {
            Eligibility::NotEligible
        } else if env_fresh && air_fresh && self.air.health() == SensorHealth::Ready {
            Eligibility::Fresh
        } else {
            Eligibility::Degraded
        };

        let env = self.last_env.unwrap_or(EnvMeasurement {
            temperature_centi_c: 0,
            humidity_milli_pct: 0,
            pressure_pa: 0,
        });
        let air = self.last_air.unwrap_or(AirMeasurement {
            eco2_ppm: BOOTSTRAP_ECO2_PPM,
            tvoc_ppb: BOOTSTRAP_TVOC_PPB,
        });

        Snapshot {
            reading: Reading {
                tick,
                temperature_centi_c: env.temperature_centi_c,
                humidity_milli_pct: env.humidity_milli_pct,
                pressure_pa: env.pressure_pa,
                eco2_ppm: air.eco2_ppm,
                tvoc_ppb: air.tvoc_ppb,
            },
            env_health: self.env.health(),
            air_health: self.air.health(),
            env_stale: !env_fresh,
            air_stale: !air_fresh,
            eligibility,
        }
    }
}
