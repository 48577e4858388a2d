// SPDX-License-Identifier: GPL-3.0-or-later
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The pixel layout of the thermal sensor.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct SensorGeometry {
    #[serde(default = "SensorGeometry::default_rows")]
    pub(crate) rows: u32,

    #[serde(default = "SensorGeometry::default_columns")]
    pub(crate) columns: u32,
}

impl SensorGeometry {
    // MLX90640 layout
    fn default_rows() -> u32 {
        24
    }

    fn default_columns() -> u32 {
        32
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self {
            rows: Self::default_rows(),
            columns: Self::default_columns(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FrameError {
    /// The number of samples does not match the sensor geometry.
    Shape { expected: usize, actual: usize },

    /// A sample was NaN or infinite.
    NonFinite { index: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Shape { expected, actual } => write!(
                f,
                "expected {} temperature samples, received {}",
                expected, actual
            ),
            FrameError::NonFinite { index } => {
                write!(f, "temperature sample {} is not a finite number", index)
            }
        }
    }
}

impl StdError for FrameError {}

/// A full frame of temperatures in degrees Celsius, row-major.
///
/// The only way to get one is through [`RawFrame::validate`], so a `RawFrame` always matches its
/// geometry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawFrame {
    geometry: SensorGeometry,
    samples: Vec<f32>,
}

impl RawFrame {
    pub(crate) fn validate(values: &[f64], geometry: SensorGeometry) -> Result<Self, FrameError> {
        let expected = geometry.sample_count();
        if values.len() != expected {
            return Err(FrameError::Shape {
                expected,
                actual: values.len(),
            });
        }
        let samples = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let sample = *value as f32;
                if sample.is_finite() {
                    Ok(sample)
                } else {
                    Err(FrameError::NonFinite { index })
                }
            })
            .collect::<Result<Vec<f32>, _>>()?;
        Ok(Self { geometry, samples })
    }

    pub(crate) fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub(crate) fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub(crate) fn stats(&self) -> FrameStats {
        FrameStats::from_samples(&self.samples)
    }
}

/// Summary temperatures for a frame, in degrees Celsius.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub(crate) struct FrameStats {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) mean: f32,
}

impl FrameStats {
    /// Summarize a frame that may or may not be the right shape.
    ///
    /// Anything that doesn't match the geometry (or has non-finite samples) gives the all-zero
    /// summary instead of an error, as this is only used for display.
    pub(crate) fn summarize(values: &[f64], geometry: SensorGeometry) -> Self {
        match RawFrame::validate(values, geometry) {
            Ok(frame) => frame.stats(),
            Err(_) => Self::default(),
        }
    }

    fn from_samples(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let (min, max, sum) = samples.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0f64),
            |(min, max, sum), sample| (min.min(*sample), max.max(*sample), sum + *sample as f64),
        );
        Self {
            min,
            max,
            mean: (sum / samples.len() as f64) as f32,
        }
    }
}
