//! Station orchestrator.
//!
//! One `tick` per sample period: measure, maybe update the display, maybe
//! persist the air-sensor baseline. The tick loop itself lives in the
//! binary; this type only sequences the work and applies the cadences from
//! [`StationConfig`].
//!
//! Nothing in here aborts. A faulted sensor degrades the snapshot, a failed
//! display update leaves the pending frame for the next attempt, a failed
//! save is retried at the next save tick; everything is logged and the
//! 1 Hz cadence marches on.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, error, info, warn};

use crate::config::StationConfig;
use crate::display::{DisplayController, PanelDriver};
use crate::reading::{Eligibility, Snapshot};
use crate::sampler::Sampler;
use crate::sensors::SensorError;
use crate::storage::{self, BaselineRecord, BaselineStore, RECORD_BYTES};

pub struct Station<E, A, P, S> {
    sampler: Sampler<E, A>,
    display: DisplayController<P>,
    store: S,
    config: StationConfig,
    tick: u64,
}

impl<E, A, P, S> Station<E, A, P, S>
where
    E: I2c,
    A: I2c,
    P: PanelDriver,
    S: BaselineStore,
{
    /// Assemble the station and offer any stored baseline to the sampler.
    pub fn new(
        mut sampler: Sampler<E, A>,
        display: DisplayController<P>,
        mut store: S,
        config: StationConfig,
    ) -> Self {
        let mut buf = [0u8; RECORD_BYTES];
        match store.load(&mut buf) {
            Ok(Some(len)) => match storage::decode(&buf[..len]) {
                Ok(record) if record.is_plausible() => {
                    info!("restoring stored air-quality baseline");
                    sampler.restore_baseline(record.baseline());
                }
                Ok(_) => warn!("stored baseline implausible, starting clean"),
                Err(e) => warn!("stored baseline unreadable: {}", e),
            },
            Ok(None) => debug!("no stored baseline"),
            Err(e) => warn!("baseline load failed: {:?}", e),
        }

        Self {
            sampler,
            display,
            store,
            config,
            tick: 0,
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Run one cycle and return what it measured.
    pub fn tick<D: DelayNs>(&mut self, delay: &mut D) -> Snapshot {
        let t = self.tick;
        let snapshot = self.sampler.sample(t, delay);

        if t % u64::from(self.config.display_update_ticks).max(1) == 0 {
            self.update_display(&snapshot);
        }
        if t > 0 && t % u64::from(self.config.baseline_save_ticks).max(1) == 0 {
            self.save_baseline(delay);
        }

        self.tick = t + 1;
        snapshot
    }

    fn update_display(&mut self, snapshot: &Snapshot) {
        match snapshot.eligibility {
            Eligibility::NotEligible => {
                debug!("display due but nothing measured yet");
                return;
            }
            Eligibility::Degraded if !self.config.allow_degraded => {
                debug!("display due but snapshot degraded, holding previous image");
                return;
            }
            _ => {}
        }
        if let Err(e) = self.display.render(snapshot) {
            error!("display update failed: {}", e);
        }
    }

    fn save_baseline<D: DelayNs>(&mut self, delay: &mut D) {
        let baseline = match self.sampler.air_baseline(delay) {
            Ok(b) => b,
            Err(SensorError::CalibrationRejected) => {
                debug!("baseline save due, sensor not ready yet");
                return;
            }
            Err(e) => {
                warn!("baseline readback failed: {}", e);
                return;
            }
        };

        let record = BaselineRecord::new(baseline);
        if !record.is_plausible() {
            warn!("sensor reported implausible baseline, not saving");
            return;
        }

        let mut buf = [0u8; RECORD_BYTES];
        match storage::encode(&record, &mut buf) {
            Ok(len) => match self.store.save(&buf[..len]) {
                Ok(()) => info!(
                    "baseline saved (eCO2=0x{:04X} TVOC=0x{:04X})",
                    baseline.eco2, baseline.tvoc
                ),
                Err(e) => error!("baseline save failed: {:?}", e),
            },
            Err(e) => error!("baseline encode failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::frame::{FrameBuffer, Region};
    use crate::display::{DisplayError, Ram, RefreshKind};
    use crate::sensors::bme280::Bme280;
    use crate::sensors::sgp30::{Baseline, Sgp30};
    use crate::storage::MemoryStore;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
    use std::cell::Cell;
    use std::rc::Rc;

    const ENV_ADDR: u8 = 0x76;
    const AIR_ADDR: u8 = 0x58;

    /// Counts physical refreshes; every panel primitive succeeds.
    #[derive(Clone, Default)]
    struct CountingPanel {
        refreshes: Rc<Cell<usize>>,
    }

    impl PanelDriver for CountingPanel {
        fn wake(&mut self) -> Result<(), DisplayError> {
            Ok(())
        }

        fn write_ram(
            &mut self,
            _ram: Ram,
            _frame: &FrameBuffer,
            _region: Region,
        ) -> Result<(), DisplayError> {
            Ok(())
        }

        fn refresh(&mut self, _kind: RefreshKind) -> Result<(), DisplayError> {
            self.refreshes.set(self.refreshes.get() + 1);
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), DisplayError> {
            Ok(())
        }
    }

    fn sgp30_word(value: u16) -> Vec<u8> {
        let be = value.to_be_bytes();
        let mut crc = 0xFFu8;
        for &byte in &be {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
            }
        }
        vec![be[0], be[1], crc]
    }

    fn sgp30_words(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|&v| sgp30_word(v)).collect()
    }

    fn env_init() -> Vec<Transaction> {
        let block0 = vec![
            0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B,
            0x8C, 0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x4B,
        ];
        let block1 = vec![0x6B, 0x01, 0x00, 0x14, 0x20, 0x03, 0x1E];
        vec![
            Transaction::write_read(ENV_ADDR, vec![0xD0], vec![0x60]),
            Transaction::write(ENV_ADDR, vec![0xE0, 0xB6]),
            Transaction::write_read(ENV_ADDR, vec![0xF3], vec![0x00]),
            Transaction::write_read(ENV_ADDR, vec![0x88], block0),
            Transaction::write_read(ENV_ADDR, vec![0xE1], block1),
            Transaction::write(ENV_ADDR, vec![0xF2, 0x01]),
            Transaction::write(ENV_ADDR, vec![0xF5, 0x00]),
        ]
    }

    fn env_measure() -> Vec<Transaction> {
        vec![
            Transaction::write(ENV_ADDR, vec![0xF4, 0x25]),
            Transaction::write_read(ENV_ADDR, vec![0xF3], vec![0x00]),
            Transaction::write_read(
                ENV_ADDR,
                vec![0xF7],
                vec![0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x80, 0x00],
            ),
        ]
    }

    fn env_measure_nack() -> Transaction {
        Transaction::write(ENV_ADDR, vec![0xF4, 0x25])
            .with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
    }

    fn air_init() -> Vec<Transaction> {
        vec![
            Transaction::write(AIR_ADDR, vec![0x36, 0x82]),
            Transaction::read(AIR_ADDR, sgp30_words(&[0x0000, 0x0123, 0x4567])),
            Transaction::write(AIR_ADDR, vec![0x20, 0x2F]),
            Transaction::read(AIR_ADDR, sgp30_word(0x0020)),
            Transaction::write(AIR_ADDR, vec![0x20, 0x03]),
        ]
    }

    /// Humidity compensation frame for the fixed datasheet measurement.
    fn air_humidity() -> Transaction {
        let ah = crate::sampler::absolute_humidity_q8(2508, 68_061);
        let mut frame = vec![0x20, 0x61];
        frame.extend(sgp30_word(ah));
        Transaction::write(AIR_ADDR, frame)
    }

    fn air_measure(eco2: u16, tvoc: u16) -> Vec<Transaction> {
        vec![
            Transaction::write(AIR_ADDR, vec![0x20, 0x08]),
            Transaction::read(AIR_ADDR, sgp30_words(&[eco2, tvoc])),
        ]
    }

    fn air_baseline_readback(eco2: u16, tvoc: u16) -> Vec<Transaction> {
        vec![
            Transaction::write(AIR_ADDR, vec![0x20, 0x15]),
            Transaction::read(AIR_ADDR, sgp30_words(&[eco2, tvoc])),
        ]
    }

    fn config(display: u32, save: u32, allow_degraded: bool) -> StationConfig {
        StationConfig {
            display_update_ticks: display,
            baseline_save_ticks: save,
            allow_degraded,
            ..StationConfig::default()
        }
    }

    struct Rig {
        station: Station<I2cMock, I2cMock, CountingPanel, MemoryStore>,
        env_i2c: I2cMock,
        air_i2c: I2cMock,
        panel: CountingPanel,
    }

    impl Rig {
        fn new(
            env_script: &[Transaction],
            air_script: &[Transaction],
            warmup: u16,
            store: MemoryStore,
            cfg: StationConfig,
        ) -> Self {
            let env_i2c = I2cMock::new(env_script);
            let air_i2c = I2cMock::new(air_script);
            let panel = CountingPanel::default();
            let sampler = Sampler::new(
                Bme280::new(env_i2c.clone()),
                Sgp30::with_warmup(air_i2c.clone(), warmup),
            );
            let display = DisplayController::new(panel.clone(), cfg.full_refresh_every);
            let station = Station::new(sampler, display, store, cfg);
            Self {
                station,
                env_i2c,
                air_i2c,
                panel,
            }
        }

        fn finish(mut self) {
            self.env_i2c.done();
            self.air_i2c.done();
        }
    }

    #[test]
    fn test_boot_restores_stored_baseline() {
        let record = BaselineRecord::new(Baseline { eco2: 0x8973, tvoc: 0x8AAE });
        let mut buf = [0u8; RECORD_BYTES];
        let len = storage::encode(&record, &mut buf).unwrap();
        let store = MemoryStore::with_record(&buf[..len]);

        let mut env_script = env_init();
        env_script.extend(env_measure());

        let mut air_script = air_init();
        // restored words go out during init, TVOC first
        let mut baseline_frame = vec![0x20, 0x1E];
        baseline_frame.extend(sgp30_words(&[0x8AAE, 0x8973]));
        air_script.push(Transaction::write(AIR_ADDR, baseline_frame));
        air_script.push(air_humidity());
        air_script.extend(air_measure(400, 0));

        let mut rig = Rig::new(&env_script, &air_script, 15, store, config(30, 3600, true));
        let mut delay = NoopDelay::new();

        let snapshot = rig.station.tick(&mut delay);
        assert_eq!(snapshot.air_health, crate::reading::SensorHealth::Warming);
        // tick 0 display is due; degraded warm-up data still renders
        assert_eq!(rig.panel.refreshes.get(), 1);

        rig.finish();
    }

    #[test]
    fn test_display_cadence_skips_degraded_when_configured() {
        let mut env_script = env_init();
        env_script.extend(env_measure()); // tick 0
        env_script.extend(env_measure()); // tick 1
        env_script.push(env_measure_nack()); // tick 2: fault
        env_script.extend(env_measure()); // tick 3
        env_script.extend(env_measure()); // tick 4

        // vary eCO2 so the due frames are never identical to the shown one
        let mut air_script = air_init();
        for tick in 0..5u16 {
            if tick != 2 {
                air_script.push(air_humidity());
            }
            air_script.extend(air_measure(400 + tick, 0));
        }

        let mut rig = Rig::new(
            &env_script,
            &air_script,
            1, // ready from the first sample
            MemoryStore::new(),
            config(2, 3600, false),
        );
        let mut delay = NoopDelay::new();

        rig.station.tick(&mut delay); // tick 0: due, fresh -> renders
        assert_eq!(rig.panel.refreshes.get(), 1);

        rig.station.tick(&mut delay); // tick 1: not due
        assert_eq!(rig.panel.refreshes.get(), 1);

        let degraded = rig.station.tick(&mut delay); // tick 2: due but degraded
        assert_eq!(degraded.eligibility, Eligibility::Degraded);
        assert_eq!(rig.panel.refreshes.get(), 1, "degraded snapshot must not render");

        rig.station.tick(&mut delay); // tick 3: not due
        rig.station.tick(&mut delay); // tick 4: due, fresh again
        assert_eq!(rig.panel.refreshes.get(), 2);

        rig.finish();
    }

    #[test]
    fn test_baseline_saved_on_cadence() {
        let mut env_script = env_init();
        for _ in 0..3 {
            env_script.extend(env_measure());
        }

        let mut air_script = air_init();
        for _ in 0..3 {
            air_script.push(air_humidity());
            air_script.extend(air_measure(412, 19));
        }
        // save due at tick 2
        air_script.extend(air_baseline_readback(0x8973, 0x8AAE));

        let mut rig = Rig::new(
            &env_script,
            &air_script,
            1,
            MemoryStore::new(),
            config(1000, 2, true),
        );
        let mut delay = NoopDelay::new();

        rig.station.tick(&mut delay);
        rig.station.tick(&mut delay);
        assert!(rig.station.store_mut().is_empty());

        rig.station.tick(&mut delay);
        let mut buf = [0u8; RECORD_BYTES];
        let len = rig.station.store_mut().load(&mut buf).unwrap().unwrap();
        let record = storage::decode(&buf[..len]).unwrap();
        assert_eq!(record.baseline(), Baseline { eco2: 0x8973, tvoc: 0x8AAE });

        rig.finish();
    }

    #[test]
    fn test_baseline_save_waits_for_warmup() {
        let mut env_script = env_init();
        for _ in 0..3 {
            env_script.extend(env_measure());
        }

        // no GET_IAQ_BASELINE traffic at all: the readback is rejected
        // before touching the bus
        let mut air_script = air_init();
        for _ in 0..3 {
            air_script.push(air_humidity());
            air_script.extend(air_measure(400, 0));
        }

        let mut rig = Rig::new(
            &env_script,
            &air_script,
            100, // still warming at tick 2
            MemoryStore::new(),
            config(1000, 2, true),
        );
        let mut delay = NoopDelay::new();

        rig.station.tick(&mut delay);
        rig.station.tick(&mut delay);
        rig.station.tick(&mut delay);
        assert!(rig.station.store_mut().is_empty());

        rig.finish();
    }
}
