// SPDX-License-Identifier: GPL-3.0-or-later
use image::imageops::{self, FilterType};
use serde::Deserialize;

use crate::image_buffer::IntensityImage;

/// Different resizing methods
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Method {
    /// Nearest neighbor sampling.
    Nearest,

    /// Triangle (aka linear) sampling.
    #[serde(alias = "linear")]
    Triangle,

    /// Catmull-Rom (aka bicubic) sampling.
    #[serde(alias = "bicubic", alias = "cubic")]
    CatmullRom,

    /// Gaussian sampling.
    Gaussian,

    /// Lanczos sampling with a window size of 3.
    #[serde(alias = "lanczos")]
    Lanczos3,
}

impl Default for Method {
    fn default() -> Self {
        Self::CatmullRom
    }
}

impl From<Method> for FilterType {
    fn from(method: Method) -> Self {
        match method {
            Method::Nearest => FilterType::Nearest,
            Method::Triangle => FilterType::Triangle,
            Method::CatmullRom => FilterType::CatmullRom,
            Method::Gaussian => FilterType::Gaussian,
            Method::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Enlarge an intensity image by an integer factor.
///
/// Resizing happens on the intensities rather than on colors, so the palette is applied to
/// interpolated values instead of blending between palette entries. Filters that overshoot
/// (Catmull-Rom, Lanczos) are clamped to the `u16` range by `imageops`.
pub(crate) fn enlarge(
    intensities: &IntensityImage,
    scale_factor: u32,
    method: Method,
) -> IntensityImage {
    let new_width = intensities.width() * scale_factor;
    let new_height = intensities.height() * scale_factor;
    if scale_factor == 1 {
        return intensities.clone();
    }
    imageops::resize(intensities, new_width, new_height, method.into())
}

#[cfg(test)]
mod test {
    use super::{enlarge, Method};
    use crate::image_buffer::IntensityImage;

    #[test]
    fn default_is_cubic() {
        assert_eq!(Method::default(), Method::CatmullRom);
    }

    #[test]
    fn aliases() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            method: Method,
        }
        let parse = |s: &str| {
            toml::from_str::<Wrapper>(&format!("method = \"{}\"", s)).map(|w| w.method)
        };
        assert_eq!(parse("bicubic").unwrap(), Method::CatmullRom);
        assert_eq!(parse("cubic").unwrap(), Method::CatmullRom);
        assert_eq!(parse("linear").unwrap(), Method::Triangle);
        assert_eq!(parse("lanczos").unwrap(), Method::Lanczos3);
        assert!(parse("mitchell").is_err());
    }

    #[test]
    fn enlarged_dimensions() {
        let source = IntensityImage::from_fn(32, 24, |x, y| image::Luma([(x * 1000 + y) as u16]));
        let enlarged = enlarge(&source, 10, Method::CatmullRom);
        assert_eq!(enlarged.dimensions(), (320, 240));
    }

    #[test]
    fn nearest_keeps_blocks() {
        let source = IntensityImage::from_fn(2, 1, |x, _| image::Luma([x as u16 * 60000]));
        let enlarged = enlarge(&source, 4, Method::Nearest);
        assert_eq!(enlarged.get_pixel(0, 0).0, [0]);
        assert_eq!(enlarged.get_pixel(7, 3).0, [60000]);
    }

    #[test]
    fn scale_of_one_is_identity() {
        let source = IntensityImage::from_fn(3, 3, |x, y| image::Luma([(x + y) as u16]));
        assert_eq!(enlarge(&source, 1, Method::Lanczos3), source);
    }
}
