// SPDX-License-Identifier: GPL-3.0-or-later
use std::fs;
use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

mod cli;
mod logging;

use crate::acquisition::AcquisitionSettings;
use crate::frame::SensorGeometry;
use crate::render::RenderSettings;
use crate::source::SourceSettings;
use crate::stream::StreamSettings;
pub(crate) use cli::Args;
pub(crate) use logging::LoggingSettings;

#[derive(Debug, Deserialize)]
pub(crate) struct Settings {
    /// The layout of the sensor's pixels.
    #[serde(default)]
    pub(crate) sensor: SensorGeometry,

    /// Where the sensor data comes from.
    pub(crate) source: SourceSettings,

    /// Polling and buffering for the acquisition worker.
    #[serde(default)]
    pub(crate) acquisition: AcquisitionSettings,

    /// Settings related to how the data is rendered for the video streams.
    #[serde(default)]
    pub(crate) render: RenderSettings,

    /// Settings related to the HTTP server for the video streams.
    #[serde(default)]
    pub(crate) streams: StreamSettings,

    #[serde(default)]
    pub(crate) logging: LoggingSettings,
}

impl Settings {
    pub(crate) fn from_path(path: &Path) -> anyhow::Result<Self> {
        let config_data = fs::read_to_string(path)
            .with_context(|| format!("unable to read configuration file {}", path.display()))?;
        toml::from_str(&config_data)
            .with_context(|| format!("unable to parse configuration file {}", path.display()))
    }

    /// Apply any overrides given on the command line.
    pub(crate) fn apply_args(&mut self, args: &Args) {
        if let Some(palette) = args.palette {
            self.render.palette = palette;
        }
    }
}
