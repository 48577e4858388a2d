// SPDX-License-Identifier: GPL-3.0-or-later
//! Summary temperatures drawn in the corner of rendered frames, rasterized with [fontdue].
use std::fmt;

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::imageops::overlay;
use image::{GrayImage, Luma, RgbImage};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::frame::FrameStats;

const DEJA_VU_SANS_MONO: &[u8] = include_bytes!("DejaVuSansMono.ttf");
const FONT_SIZE: f32 = 14.0;
/// Distance between the tops of consecutive lines.
const LINE_HEIGHT: u32 = 18;
/// Offset of the first line from the top left corner.
const MARGIN: u32 = 6;
// A mostly static scene repeats the same few readings.
const LINE_CACHE_SIZE: usize = 64;

pub(super) struct StatsOverlay {
    font: Font,
    layout: Mutex<Layout>,
    cache: Mutex<LruCache<String, GrayImage>>,
}

impl StatsOverlay {
    pub(super) fn new() -> Result<Self, &'static str> {
        let font = Font::from_bytes(DEJA_VU_SANS_MONO, FontSettings::default())?;
        Ok(Self {
            font,
            layout: Mutex::new(Layout::new(CoordinateSystem::PositiveYDown)),
            cache: Mutex::new(LruCache::new(LINE_CACHE_SIZE)),
        })
    }

    /// The text drawn for a frame, top to bottom.
    fn lines(stats: &FrameStats) -> [String; 3] {
        [
            format!("Min: {:.2}°C", stats.min),
            format!("Max: {:.2}°C", stats.max),
            format!("Avg: {:.2}°C", stats.mean),
        ]
    }

    /// Rasterize one line of text into an opacity mask.
    fn render_line(&self, text: &str) -> GrayImage {
        let mut layout = self.layout.lock();
        layout.reset(&LayoutSettings::default());
        layout.append(&[&self.font], &TextStyle::new(text, FONT_SIZE, 0));
        let glyphs = layout.glyphs();
        let width = glyphs
            .iter()
            .map(|glyph| glyph.x.max(0.0) as u32 + glyph.width as u32)
            .max()
            .unwrap_or(0);
        let mut mask = GrayImage::new(width, LINE_HEIGHT);
        for glyph in glyphs.iter() {
            let (metrics, bitmap) = self.font.rasterize_config(glyph.key);
            if let Some(bitmap) =
                GrayImage::from_raw(metrics.width as u32, metrics.height as u32, bitmap)
            {
                overlay(
                    &mut mask,
                    &bitmap,
                    glyph.x.max(0.0) as u32,
                    glyph.y.max(0.0) as u32,
                );
            }
        }
        mask
    }

    /// Draw the min, max and mean of a frame onto its colored image.
    pub(super) fn draw(&self, image: &mut RgbImage, stats: &FrameStats) {
        let mut cache = self.cache.lock();
        for (index, line) in Self::lines(stats).iter().enumerate() {
            if cache.get(line).is_none() {
                trace!(%line, "cache miss");
                let mask = self.render_line(line);
                cache.put(line.clone(), mask);
            }
            if let Some(mask) = cache.get(line) {
                blend(image, mask, MARGIN, MARGIN + index as u32 * LINE_HEIGHT);
            }
        }
    }
}

/// White text over a black shadow offset by one pixel, so it stays legible on the light end of
/// every palette.
fn blend(image: &mut RgbImage, mask: &GrayImage, left: u32, top: u32) {
    for (offset, color) in [(1u32, u8::MIN), (0, u8::MAX)].iter() {
        for (x, y, Luma([alpha])) in mask.enumerate_pixels() {
            let (x, y) = (left + x + offset, top + y + offset);
            if *alpha == 0 || x >= image.width() || y >= image.height() {
                continue;
            }
            let alpha = u16::from(*alpha);
            let target = u16::from(*color);
            for channel in image.get_pixel_mut(x, y).0.iter_mut() {
                let mixed = (u16::from(*channel) * (255 - alpha) + target * alpha) / 255;
                *channel = mixed as u8;
            }
        }
    }
}

impl fmt::Debug for StatsOverlay {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // fontdue's Layout doesn't implement Debug
        fmt.debug_struct("StatsOverlay")
            .field("font", &self.font)
            .field("layout", &"Mutex<Layout { opaque }>")
            .field("cached_lines", &self.cache.try_lock().map(|cache| cache.len()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use image::{Rgb, RgbImage};

    use super::StatsOverlay;
    use crate::frame::FrameStats;

    const BACKGROUND: Rgb<u8> = Rgb([40, 40, 160]);

    fn stats() -> FrameStats {
        FrameStats {
            min: 19.5,
            max: 31.25,
            mean: 24.1,
        }
    }

    #[test]
    fn line_text() {
        let lines = StatsOverlay::lines(&stats());
        assert_eq!(lines[0], "Min: 19.50°C");
        assert_eq!(lines[1], "Max: 31.25°C");
        assert_eq!(lines[2], "Avg: 24.10°C");
    }

    #[test]
    fn draws_in_top_left() {
        let overlay = StatsOverlay::new().unwrap();
        let mut image = RgbImage::from_pixel(320, 240, BACKGROUND);
        overlay.draw(&mut image, &stats());
        let changed = |x_range: std::ops::Range<u32>, y_range: std::ops::Range<u32>| {
            x_range
                .flat_map(|x| y_range.clone().map(move |y| (x, y)))
                .filter(|(x, y)| *image.get_pixel(*x, *y) != BACKGROUND)
                .count()
        };
        assert!(changed(0..160, 0..70) > 0, "no text was drawn");
        assert_eq!(changed(160..320, 0..240), 0);
        assert_eq!(changed(0..320, 70..240), 0);
    }

    #[test]
    fn tiny_frame() {
        let overlay = StatsOverlay::new().unwrap();
        let mut image = RgbImage::from_pixel(8, 6, BACKGROUND);
        // Text past the edges is clipped
        overlay.draw(&mut image, &stats());
        assert_eq!(image.dimensions(), (8, 6));
    }

    #[test]
    fn lines_are_cached() {
        let overlay = StatsOverlay::new().unwrap();
        let mut first = RgbImage::from_pixel(320, 240, BACKGROUND);
        let mut second = first.clone();
        overlay.draw(&mut first, &stats());
        overlay.draw(&mut second, &stats());
        assert_eq!(overlay.cache.lock().len(), 3);
        assert_eq!(first, second);
    }
}
