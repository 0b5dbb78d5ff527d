//! Host-side station simulator.
//!
//! Runs the full orchestrator against wire-level device models: both sensors
//! answer real I²C register and command traffic on one shared bus, and the
//! panel decodes its actual SPI command stream, so every driver runs exactly
//! as it would on the board.
//!
//! Two phases run back to back:
//!
//! | Phase       | What it shows                                             |
//! |-------------|-----------------------------------------------------------|
//! | cold boot   | warm-up bootstrap, boot full refresh, partial cadence, a  |
//! |             | mid-run air sensor outage and recovery, baseline saves    |
//! | power cycle | the persisted baseline restored into the sensor at init   |
//!
//! Measurements print to stdout once per tick. Set `RUST_LOG=info` for the
//! lifecycle (refreshes, saves, restores) and `RUST_LOG=debug` for bus-level
//! detail.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use airsense_core::bus;
use airsense_core::config::StationConfig;
use airsense_core::display::DisplayController;
use airsense_core::display::panel::Panel;
use airsense_core::sampler::Sampler;
use airsense_core::sensors::bme280::Bme280;
use airsense_core::sensors::sgp30::Sgp30;
use airsense_core::station::Station;
use airsense_core::storage::{self, BaselineStore, MemoryStore, RECORD_BYTES};
use log::{info, warn};

mod devices;

use devices::{InstantDelay, PanelState, PinRole, SimBus, SimBusyPin, SimPin, SimSpi};

// ---------------------------------------------------------------------------
// Run constants
// ---------------------------------------------------------------------------

/// Wall-clock pacing per simulated tick (the real period is one second).
const TICK_PACE: Duration = Duration::from_millis(25);

/// Ticks simulated before the fake power cycle.
const COLD_BOOT_TICKS: u64 = 130;

/// Ticks simulated after the fake power cycle.
const RESTART_TICKS: u64 = 65;

/// Window during which the air sensor stops acknowledging.
const AIR_OUTAGE: Range<u64> = 70..74;

/// Short cadences so one run shows the whole lifecycle.
fn sim_config() -> StationConfig {
    StationConfig {
        display_update_ticks: 30,
        full_refresh_every: 4,
        baseline_save_ticks: 60,
        ..StationConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();

    let config = sim_config();
    info!("starting airsense station simulator");
    info!(
        "display every {} ticks, full refresh every {} updates, baseline save every {} ticks",
        config.display_update_ticks, config.full_refresh_every, config.baseline_save_ticks
    );

    let saved = run_phase(
        "cold boot",
        COLD_BOOT_TICKS,
        Some(AIR_OUTAGE),
        MemoryStore::new(),
        config,
    );

    let Some(bytes) = saved else {
        warn!("no baseline was persisted; skipping the restart phase");
        return;
    };
    if let Ok(record) = storage::decode(&bytes) {
        let baseline = record.baseline();
        info!(
            "power cycle: carrying a {} byte record across (eCO2=0x{:04X} TVOC=0x{:04X})",
            bytes.len(),
            baseline.eco2,
            baseline.tvoc
        );
    }

    run_phase(
        "power cycle",
        RESTART_TICKS,
        None,
        MemoryStore::with_record(&bytes),
        config,
    );

    info!("simulation complete");
}

// ---------------------------------------------------------------------------
// Phase runner
// ---------------------------------------------------------------------------

/// Bring a station up on fresh device models, run it for `ticks` cycles and
/// hand back whatever record ended up in the store.
fn run_phase(
    name: &str,
    ticks: u64,
    outage: Option<Range<u64>>,
    store: MemoryStore,
    config: StationConfig,
) -> Option<Vec<u8>> {
    info!("==== {name} ====");

    let i2c = RefCell::new(SimBus::new());
    let (env_dev, air_dev) = bus::shared(&i2c);
    let sampler = Sampler::new(
        Bme280::new(env_dev),
        Sgp30::with_warmup(air_dev, config.warmup_ticks),
    );

    let panel_state = Rc::new(RefCell::new(PanelState::default()));
    let panel = Panel::new(
        SimSpi::new(Rc::clone(&panel_state)),
        SimPin::new(Rc::clone(&panel_state), PinRole::DataCommand),
        SimPin::new(Rc::clone(&panel_state), PinRole::Reset),
        SimBusyPin,
        InstantDelay,
    );
    let display = DisplayController::new(panel, config.full_refresh_every);

    let mut station = Station::new(sampler, display, store, config);
    let mut delay = InstantDelay;

    for t in 0..ticks {
        if let Some(window) = &outage {
            i2c.borrow_mut().set_air_offline(window.contains(&t));
        }

        let snapshot = station.tick(&mut delay);
        println!(
            "[{:>3}] {}  env:{} air:{}",
            t, snapshot.reading, snapshot.env_health, snapshot.air_health
        );

        thread::sleep(TICK_PACE);
    }

    let state = panel_state.borrow();
    info!(
        "{name}: {} full and {} partial refreshes",
        state.full_refreshes, state.partial_refreshes
    );

    let mut buf = [0u8; RECORD_BYTES];
    match station.store_mut().load(&mut buf) {
        Ok(Some(len)) => Some(buf[..len].to_vec()),
        Ok(None) => None,
        Err(err) => {
            warn!("could not read back the store: {err:?}");
            None
        }
    }
}
