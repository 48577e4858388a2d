// SPDX-License-Identifier: GPL-3.0-or-later
use image::{ImageBuffer, Luma};

/// A frame rescaled so each point is in `[0, 1]`, one point per sensor pixel.
pub(crate) type NormalizedField = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A [`NormalizedField`] quantized to the full `u16` range, which is what gets enlarged.
pub(crate) type IntensityImage = ImageBuffer<Luma<u16>, Vec<u16>>;
