//! Display pipeline: frame diffing, layout and the panel controller.
//!
//! The bistable panel holds its image unpowered, so the pipeline is built
//! around updates being rare and expensive rather than around a refresh
//! loop. Every render draws the full layout into the [`frame::FrameBuffer`],
//! then the controller decides what physically happens: nothing when the
//! frame is unchanged, a windowed partial update for small changes, and a
//! ghost-clearing full refresh every K-th physical update.

pub mod frame;
pub mod panel;
pub mod screen;

use log::{debug, info};
use thiserror_no_std::Error;

use crate::bus::BusError;
use crate::display::frame::{FrameBuffer, Region};
use crate::reading::Snapshot;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// SPI or control-line fault while talking to the panel.
    #[error("panel transport: {0}")]
    WriteFailure(BusError),
    /// The BUSY line never released; the panel is wedged or disconnected.
    #[error("panel busy past deadline")]
    BusyTimeout,
}

/// Which controller RAM a frame write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ram {
    /// The image the next refresh will show.
    BlackWhite,
    /// The controller's copy of what the glass currently shows; partial
    /// waveforms diff against it.
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Whole-panel waveform with the inversion flashes that clear ghosting.
    Full,
    /// Differential waveform, flash-free, drives only changed pixels.
    Partial,
}

/// Hardware face of the panel, one update primitive per lifecycle step.
///
/// [`panel::Panel`] implements this over SPI; tests substitute a recorder.
pub trait PanelDriver {
    fn wake(&mut self) -> Result<(), DisplayError>;
    fn write_ram(
        &mut self,
        ram: Ram,
        frame: &FrameBuffer,
        region: Region,
    ) -> Result<(), DisplayError>;
    fn refresh(&mut self, kind: RefreshKind) -> Result<(), DisplayError>;
    fn sleep(&mut self) -> Result<(), DisplayError>;
}

/// Owns the frame, the refresh cadence and the panel lifecycle.
pub struct DisplayController<P> {
    panel: P,
    frame: FrameBuffer,
    full_refresh_every: u8,
    partial_updates_since_full: u8,
    /// False until the first full refresh has landed; before that the glass
    /// content is unknown and nothing short of a full update is safe.
    displayed_once: bool,
}

impl<P: PanelDriver> DisplayController<P> {
    pub fn new(panel: P, full_refresh_every: u8) -> Self {
        Self {
            panel,
            frame: FrameBuffer::new(),
            full_refresh_every,
            partial_updates_since_full: 0,
            displayed_once: false,
        }
    }

    /// Draw `snapshot` and push it to the glass if anything changed.
    ///
    /// Returns whether a physical update ran. On failure the cadence state
    /// and the pending frame difference survive, so the next call retries
    /// the same update.
    pub fn render(&mut self, snapshot: &Snapshot) -> Result<bool, DisplayError> {
        screen::draw(&mut self.frame, snapshot).ok();
        self.flush()
    }

    fn flush(&mut self) -> Result<bool, DisplayError> {
        let (kind, region) = if !self.displayed_once {
            (RefreshKind::Full, Region::full())
        } else {
            let Some(region) = self.frame.diff_region() else {
                debug!("frame unchanged, no panel update");
                return Ok(false);
            };
            if self.partial_updates_since_full.saturating_add(1) >= self.full_refresh_every {
                (RefreshKind::Full, Region::full())
            } else {
                (RefreshKind::Partial, region)
            }
        };

        self.panel.wake()?;
        match kind {
            RefreshKind::Full => {
                // both RAMs get the frame so the next partial diffs cleanly
                self.panel.write_ram(Ram::BlackWhite, &self.frame, region)?;
                self.panel.write_ram(Ram::Previous, &self.frame, region)?;
                self.panel.refresh(RefreshKind::Full)?;
                self.partial_updates_since_full = 0;
                self.displayed_once = true;
                info!("full refresh");
            }
            RefreshKind::Partial => {
                self.panel.write_ram(Ram::BlackWhite, &self.frame, region)?;
                self.panel.refresh(RefreshKind::Partial)?;
                // now the glass changed; bring the previous-image RAM along
                self.panel.write_ram(Ram::Previous, &self.frame, region)?;
                self.partial_updates_since_full += 1;
                debug!(
                    "partial refresh, {}x{} bytes ({} since full)",
                    region.width_bytes(),
                    region.rows(),
                    self.partial_updates_since_full
                );
            }
        }
        self.frame.mark_flushed();
        self.panel.sleep()?;
        Ok(true)
    }
}
