//! Painting mattes into the output canvas.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::VideoError;

/// Destination rectangle in output pixels. `x`/`y` may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Clamp into one canvas size of slack on every side, so a corrupt
    /// rectangle cannot paint far off-canvas or allocate a huge resize.
    pub fn bounded(self, canvas_width: u32, canvas_height: u32) -> Self {
        let cw = i64::from(canvas_width);
        let ch = i64::from(canvas_height);
        Self {
            x: self.x.clamp(-cw, 2 * cw),
            y: self.y.clamp(-ch, 2 * ch),
            width: self.width.min(canvas_width.saturating_mul(2)),
            height: self.height.min(canvas_height.saturating_mul(2)),
        }
    }
}

/// New canvas filled with `color`.
pub fn fill(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color)
}

/// Parse any CSS colour value: hex, named, `rgb()`, `hsl()` and friends.
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    csscolorparser::parse(value.trim()).ok().map(|c| Rgba(c.to_rgba8()))
}

/// Scale `matte` into `rect` and alpha-blend it over `canvas`.
pub fn paint_matte(canvas: &mut RgbaImage, matte: &RgbaImage, rect: PixelRect) -> Result<(), VideoError> {
    if matte.width() == 0 || matte.height() == 0 {
        return Err(VideoError::EmptyMatte("matte has no pixels".into()));
    }
    if rect.width == 0 || rect.height == 0 {
        return Err(VideoError::EmptyMatte(format!(
            "target rectangle {}x{} is empty",
            rect.width, rect.height
        )));
    }

    let scaled = if matte.dimensions() == (rect.width, rect.height) {
        Cow::Borrowed(matte)
    } else {
        Cow::Owned(imageops::resize(matte, rect.width, rect.height, FilterType::Triangle))
    };

    imageops::overlay(canvas, scaled.as_ref(), rect.x, rect.y);
    Ok(())
}
