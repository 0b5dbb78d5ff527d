//! In-RAM frame for the bistable panel, with shadow-based change detection.
//!
//! Drawing targets this buffer instead of the panel; a flush then compares
//! it against a shadow copy of what the glass currently shows and sends only
//! the bounding region of changed bytes. Because the comparison is at byte
//! granularity, the resulting window is already aligned the way the
//! controller's partial-update RAM addressing needs it.
//!
//! The shadow is only advanced by [`FrameBuffer::mark_flushed`] after the
//! hardware accepted the update, so a failed update keeps the difference
//! pending and the next cycle retries it.
//!
//! The panel scans 128 sources x 296 gates (portrait); the station mounts it
//! in landscape. Pixels are addressed in logical landscape coordinates and
//! rotated here, one bit per pixel, MSB first, 1 = white.

use core::convert::Infallible;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;

/// Logical (landscape) width in pixels.
pub const WIDTH: u32 = 296;
/// Logical (landscape) height in pixels.
pub const HEIGHT: u32 = 128;

/// Native portrait geometry: sources across, gates down.
pub const NATIVE_WIDTH: usize = 128;
pub const NATIVE_HEIGHT: usize = 296;
/// Bytes per native row.
pub const ROW_BYTES: usize = NATIVE_WIDTH / 8;
/// Size of one full frame.
pub const BUFFER_BYTES: usize = ROW_BYTES * NATIVE_HEIGHT;

/// A byte-aligned window of the native frame, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First dirty byte column (native x / 8).
    pub byte_x0: u8,
    /// Last dirty byte column.
    pub byte_x1: u8,
    /// First dirty gate row.
    pub y0: u16,
    /// Last dirty gate row.
    pub y1: u16,
}

impl Region {
    /// The whole frame.
    pub fn full() -> Self {
        Self {
            byte_x0: 0,
            byte_x1: (ROW_BYTES - 1) as u8,
            y0: 0,
            y1: (NATIVE_HEIGHT - 1) as u16,
        }
    }

    pub fn width_bytes(&self) -> usize {
        (self.byte_x1 - self.byte_x0) as usize + 1
    }

    pub fn rows(&self) -> usize {
        (self.y1 - self.y0) as usize + 1
    }
}

pub struct FrameBuffer {
    /// Working frame the next update will show.
    pixels: [u8; BUFFER_BYTES],
    /// What the glass showed after the last accepted update.
    shown: [u8; BUFFER_BYTES],
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// A white frame with an in-sync shadow.
    ///
    /// The glass content at power-on is unknown, so the first physical
    /// update must be a full refresh regardless of what the diff says; the
    /// controller enforces that.
    pub fn new() -> Self {
        Self {
            pixels: [0xFF; BUFFER_BYTES],
            shown: [0xFF; BUFFER_BYTES],
        }
    }

    /// Rotate a logical landscape coordinate into the native frame and set
    /// the pixel. Out-of-bounds coordinates are ignored.
    fn set_pixel(&mut self, x: u32, y: u32, color: BinaryColor) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let native_x = NATIVE_WIDTH - 1 - y as usize;
        let native_y = x as usize;
        let idx = native_y * ROW_BYTES + native_x / 8;
        let mask = 0x80 >> (native_x % 8);
        match color {
            BinaryColor::On => self.pixels[idx] &= !mask, // ink
            BinaryColor::Off => self.pixels[idx] |= mask, // white
        }
    }

    /// Bounding region of bytes that differ from the shadow, if any.
    pub fn diff_region(&self) -> Option<Region> {
        let mut region: Option<Region> = None;
        for y in 0..NATIVE_HEIGHT {
            let row = y * ROW_BYTES;
            for bx in 0..ROW_BYTES {
                if self.pixels[row + bx] == self.shown[row + bx] {
                    continue;
                }
                let (bx, y) = (bx as u8, y as u16);
                match &mut region {
                    Some(r) => {
                        r.byte_x0 = r.byte_x0.min(bx);
                        r.byte_x1 = r.byte_x1.max(bx);
                        r.y0 = r.y0.min(y);
                        r.y1 = r.y1.max(y);
                    }
                    None => {
                        region = Some(Region {
                            byte_x0: bx,
                            byte_x1: bx,
                            y0: y,
                            y1: y,
                        })
                    }
                }
            }
        }
        region
    }

    /// Record that the working frame is now on the glass.
    pub fn mark_flushed(&mut self) {
        self.shown = self.pixels;
    }

    /// One native row of the working frame, clipped to `region`.
    pub fn row_slice(&self, y: u16, region: &Region) -> &[u8] {
        let row = y as usize * ROW_BYTES;
        &self.pixels[row + region.byte_x0 as usize..=row + region.byte_x1 as usize]
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH, HEIGHT)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.y >= 0 {
                self.set_pixel(coord.x as u32, coord.y as u32, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let fill = match color {
            BinaryColor::On => 0x00,
            BinaryColor::Off => 0xFF,
        };
        self.pixels = [fill; BUFFER_BYTES];
        Ok(())
    }
}
