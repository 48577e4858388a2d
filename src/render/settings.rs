// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::TryFrom;

use serde::Deserialize;

use super::palette::Palette;
use super::resize::Method;

/// JPEG quality, restricted to 1 through 100.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8")]
pub(crate) struct Quality(u8);

impl Quality {
    pub(crate) fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Quality {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=100).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("JPEG quality must be between 1 and 100, not {}", value))
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Integer upscaling factor, at least 1.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u32")]
pub(crate) struct ScaleFactor(u32);

impl ScaleFactor {
    pub(crate) fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        // 64x on a 32x24 sensor is already a 2048 pixel wide image
        if (1..=64).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("scale factor must be between 1 and 64, not {}", value))
        }
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self(10)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct RenderSettings {
    /// The palette used when starting up. It can be changed while running.
    #[serde(default)]
    pub(crate) palette: Palette,

    /// How many output pixels each sensor pixel is enlarged to, in each direction.
    #[serde(default)]
    pub(crate) scale_factor: ScaleFactor,

    #[serde(default)]
    pub(crate) scaling_method: Method,

    #[serde(default)]
    pub(crate) jpeg_quality: Quality,

    /// Draw the minimum, maximum and mean temperatures in the top left corner of each frame.
    #[serde(default)]
    pub(crate) overlay_stats: bool,
}
