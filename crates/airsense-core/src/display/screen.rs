//! Status screen layout.
//!
//! One static page: environmental values up top, air quality below a
//! separator, a status line at the bottom. The renderer clears and redraws
//! the whole frame every time; the framebuffer diff decides what actually
//! reaches the glass, so there is no per-element dirty bookkeeping here.
//!
//! Values measured on an earlier cycle are marked with a trailing `*`.

use core::fmt::Write;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_10X20};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Alignment, Baseline, Text, TextStyleBuilder};
use heapless::String;

use crate::display::frame::WIDTH;
use crate::reading::{SensorHealth, Snapshot};

const MARGIN: i32 = 8;
const ENV_ROW_Y: i32 = 6;
const PRESSURE_ROW_Y: i32 = 32;
const SEPARATOR_Y: i32 = 48;
const AIR_ROW_Y: i32 = 58;
const FOOTER_Y: i32 = 112;

/// Render one snapshot into the frame.
pub fn draw<D: DrawTarget<Color = BinaryColor>>(
    target: &mut D,
    snapshot: &Snapshot,
) -> Result<(), D::Error> {
    let large = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let small = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let right = TextStyleBuilder::new()
        .alignment(Alignment::Right)
        .baseline(Baseline::Top)
        .build();

    target.clear(BinaryColor::Off)?;

    let env_mark = if snapshot.env_stale { "*" } else { "" };
    let air_mark = if snapshot.air_stale { "*" } else { "" };
    let reading = &snapshot.reading;

    // ---- environmental row ----
    let mut line: String<24> = String::new();
    let sign = if reading.temperature_centi_c < 0 { "-" } else { "" };
    let t = reading.temperature_centi_c.unsigned_abs();
    write!(line, "{}{}.{} C{}", sign, t / 100, (t % 100) / 10, env_mark).ok();
    Text::with_baseline(&line, Point::new(MARGIN, ENV_ROW_Y), large, Baseline::Top)
        .draw(target)?;

    line.clear();
    let h = reading.humidity_milli_pct;
    write!(line, "{}.{} %{}", h / 1000, (h % 1000) / 100, env_mark).ok();
    Text::with_text_style(
        &line,
        Point::new(WIDTH as i32 - MARGIN, ENV_ROW_Y),
        large,
        right,
    )
    .draw(target)?;

    line.clear();
    let p = reading.pressure_pa;
    write!(line, "{}.{} hPa{}", p / 100, (p % 100) / 10, env_mark).ok();
    Text::with_baseline(&line, Point::new(MARGIN, PRESSURE_ROW_Y), small, Baseline::Top)
        .draw(target)?;

    Rectangle::new(Point::new(0, SEPARATOR_Y), Size::new(WIDTH, 1))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
        .draw(target)?;

    // ---- air quality row ----
    line.clear();
    write!(line, "CO2 {} ppm{}", reading.eco2_ppm, air_mark).ok();
    Text::with_baseline(&line, Point::new(MARGIN, AIR_ROW_Y), large, Baseline::Top)
        .draw(target)?;

    line.clear();
    write!(line, "TVOC {} ppb{}", reading.tvoc_ppb, air_mark).ok();
    Text::with_text_style(
        &line,
        Point::new(WIDTH as i32 - MARGIN, AIR_ROW_Y),
        large,
        right,
    )
    .draw(target)?;

    // ---- status footer ----
    if let Some(status) = footer(snapshot) {
        Text::with_baseline(status, Point::new(MARGIN, FOOTER_Y), small, Baseline::Top)
            .draw(target)?;
    }

    Ok(())
}

fn footer(snapshot: &Snapshot) -> Option<&'static str> {
    match (snapshot.env_health, snapshot.air_health) {
        (_, SensorHealth::Warming) => Some("air sensor warming up"),
        (SensorHealth::Uninitialized, _) | (_, SensorHealth::Uninitialized) => {
            Some("sensor offline")
        }
        (SensorHealth::Fault, _) | (_, SensorHealth::Fault) => Some("sensor fault, holding last"),
        (SensorHealth::Ready, SensorHealth::Ready) => None,
        _ => None,
    }
}
