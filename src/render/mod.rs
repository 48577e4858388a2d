// SPDX-License-Identifier: GPL-3.0-or-later
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::{Luma, Rgb, RgbImage};
use tracing::{instrument, trace};

use crate::frame::{FrameError, FrameStats, RawFrame, SensorGeometry};
use crate::image_buffer::{IntensityImage, NormalizedField};

mod jpeg;
mod overlay;
pub(crate) mod palette;
mod resize;
mod settings;

pub(crate) use palette::{Palette, PaletteError};
pub(crate) use settings::RenderSettings;

use overlay::StatsOverlay;
use resize::Method;

/// The value every point of a uniform frame normalizes to.
const UNIFORM_FIELD_VALUE: f32 = 0.5;

#[derive(Debug)]
pub(crate) enum RenderError {
    /// The normalized field doesn't have the dimensions the transformer was set up for.
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// JPEG encoding failed.
    Encode(image::ImageError),

    /// The overlay font couldn't be loaded.
    Font(&'static str),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Dimensions { expected, actual } => write!(
                f,
                "expected a {}x{} field, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            RenderError::Encode(err) => write!(f, "unable to encode frame: {}", err),
            RenderError::Font(msg) => write!(f, "unable to load overlay font: {}", msg),
        }
    }
}

impl StdError for RenderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RenderError::Dimensions { .. } | RenderError::Font(_) => None,
            RenderError::Encode(err) => Some(err),
        }
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        Self::Encode(err)
    }
}

/// A frame ready for display: a JPEG image and its dimensions.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RenderedFrame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) jpeg: Bytes,
}

/// Turns raw sensor values into JPEG frames.
///
/// Every step is a pure function of its inputs, so the same frame rendered with the same palette
/// and settings always produces the same bytes.
#[derive(Clone, Debug)]
pub(crate) struct FrameTransformer {
    geometry: SensorGeometry,
    scale_factor: u32,
    scaling_method: Method,
    quality: u8,
    overlay: Option<Arc<StatsOverlay>>,
}

impl FrameTransformer {
    pub(crate) fn new(
        geometry: SensorGeometry,
        settings: &RenderSettings,
    ) -> Result<Self, RenderError> {
        let overlay = if settings.overlay_stats {
            Some(Arc::new(StatsOverlay::new().map_err(RenderError::Font)?))
        } else {
            None
        };
        Ok(Self {
            geometry,
            scale_factor: settings.scale_factor.get(),
            scaling_method: settings.scaling_method,
            quality: settings.jpeg_quality.get(),
            overlay,
        })
    }

    /// The dimensions of rendered frames.
    pub(crate) fn output_size(&self) -> (u32, u32) {
        (
            self.geometry.columns * self.scale_factor,
            self.geometry.rows * self.scale_factor,
        )
    }

    pub(crate) fn validate(&self, values: &[f64]) -> Result<RawFrame, FrameError> {
        RawFrame::validate(values, self.geometry)
    }

    /// Rescale a frame into `[0, 1]` using its own minimum and maximum, so every frame uses the
    /// full range of the palette.
    ///
    /// A uniform frame has no range to scale by, and becomes a field of 0.5.
    pub(crate) fn normalize(&self, frame: &RawFrame) -> NormalizedField {
        let geometry = frame.geometry();
        let stats = frame.stats();
        let range = stats.max - stats.min;
        let samples: Vec<f32> = if range > 0.0 {
            frame
                .samples()
                .iter()
                .map(|sample| ((sample - stats.min) / range).max(0.0).min(1.0))
                .collect()
        } else {
            vec![UNIFORM_FIELD_VALUE; frame.samples().len()]
        };
        // validate() guarantees the sample count matches the geometry
        NormalizedField::from_raw(geometry.columns, geometry.rows, samples)
            .unwrap_or_else(|| NormalizedField::new(geometry.columns, geometry.rows))
    }

    /// Enlarge a normalized field, color it with `palette`, and encode it as a JPEG.
    pub(crate) fn render(
        &self,
        field: &NormalizedField,
        palette: Palette,
    ) -> Result<RenderedFrame, RenderError> {
        self.render_with_stats(field, palette, None)
    }

    /// Like [`render`](Self::render), additionally drawing the frame's summary temperatures when
    /// the overlay is enabled.
    #[instrument(level = "trace", skip(self, field, stats))]
    fn render_with_stats(
        &self,
        field: &NormalizedField,
        palette: Palette,
        stats: Option<&FrameStats>,
    ) -> Result<RenderedFrame, RenderError> {
        let expected = (self.geometry.columns, self.geometry.rows);
        if field.dimensions() != expected {
            return Err(RenderError::Dimensions {
                expected,
                actual: field.dimensions(),
            });
        }
        let intensities = quantize(field);
        let enlarged = resize::enlarge(&intensities, self.scale_factor, self.scaling_method);
        trace!(
            width = enlarged.width(),
            height = enlarged.height(),
            "enlarged normalized field"
        );
        let mut colored = apply_palette(&enlarged, palette);
        if let (Some(overlay), Some(stats)) = (&self.overlay, stats) {
            overlay.draw(&mut colored, stats);
        }
        let jpeg = jpeg::encode_jpeg(&colored, self.quality)?;
        Ok(RenderedFrame {
            width: colored.width(),
            height: colored.height(),
            jpeg,
        })
    }

    /// Min, max and mean of a raw frame, all zero if it's the wrong shape.
    pub(crate) fn summarize(&self, values: &[f64]) -> FrameStats {
        FrameStats::summarize(values, self.geometry)
    }

    /// The full pipeline for one frame that has already been validated.
    pub(crate) fn process(
        &self,
        frame: &RawFrame,
        palette: Palette,
    ) -> Result<RenderedFrame, RenderError> {
        self.render_with_stats(&self.normalize(frame), palette, Some(&frame.stats()))
    }
}

fn quantize(field: &NormalizedField) -> IntensityImage {
    let max = u16::MAX as f32;
    IntensityImage::from_fn(field.width(), field.height(), |x, y| {
        let Luma([value]) = *field.get_pixel(x, y);
        Luma([(value.max(0.0).min(1.0) * max).round() as u16])
    })
}

fn apply_palette(intensities: &IntensityImage, palette: Palette) -> RgbImage {
    let table = palette.lookup_table();
    RgbImage::from_fn(intensities.width(), intensities.height(), |x, y| {
        let Luma([intensity]) = *intensities.get_pixel(x, y);
        Rgb(table[(intensity >> 8) as usize])
    })
}
