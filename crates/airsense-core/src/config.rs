//! Station tunables.
//!
//! One plain config struct owned by the orchestrator. Defaults follow the
//! sensors' datasheets (1 Hz air-quality cadence, 15 s warm-up) and wear
//! limits of the panel and NVM (sparse refreshes, hourly baseline saves).

/// Sampling period in milliseconds. The SGP30 baseline algorithm expects a
/// strict 1 Hz measurement cadence, so changing this degrades its accuracy.
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 1_000;

/// Ticks between display updates (30 s at the default sample period).
pub const DEFAULT_DISPLAY_UPDATE_TICKS: u32 = 30;

/// Every K-th physical display update is a full refresh to clear ghosting.
pub const DEFAULT_FULL_REFRESH_EVERY: u8 = 12;

/// Ticks between baseline saves (hourly). Kept sparse to limit NVM wear.
pub const DEFAULT_BASELINE_SAVE_TICKS: u32 = 3_600;

/// One-second samples the SGP30 needs before its output is meaningful.
pub const DEFAULT_WARMUP_TICKS: u16 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationConfig {
    pub sample_period_ms: u32,
    pub display_update_ticks: u32,
    pub full_refresh_every: u8,
    pub baseline_save_ticks: u32,
    pub warmup_ticks: u16,
    /// Render snapshots where one sensor is faulted, with stale markers.
    /// When false the display holds the previous image instead.
    pub allow_degraded: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            display_update_ticks: DEFAULT_DISPLAY_UPDATE_TICKS,
            full_refresh_every: DEFAULT_FULL_REFRESH_EVERY,
            baseline_save_ticks: DEFAULT_BASELINE_SAVE_TICKS,
            warmup_ticks: DEFAULT_WARMUP_TICKS,
            allow_degraded: true,
        }
    }
}
