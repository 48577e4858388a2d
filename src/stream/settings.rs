// SPDX-License-Identifier: GPL-3.0-or-later
use std::net;
use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub(crate) struct StreamSettings {
    /// The address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "StreamSettings::default_address")]
    address: net::IpAddr,

    /// The port to bind the server to. Default to `9000`.
    #[serde(default = "StreamSettings::default_port")]
    port: u16,

    /// How often frames are taken from the buffer and sent to viewers, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "StreamSettings::default_refresh_interval")]
    pub(crate) refresh_interval: Duration,

    /// MJPEG-specific settings.
    #[serde(default)]
    pub(crate) mjpeg: MjpegSettings,
}

impl StreamSettings {
    fn default_address() -> net::IpAddr {
        net::IpAddr::from([127u8, 0u8, 0u8, 1u8])
    }

    fn default_port() -> u16 {
        9000u16
    }

    fn default_refresh_interval() -> Duration {
        Duration::from_millis(100)
    }
}

impl From<StreamSettings> for net::SocketAddr {
    fn from(settings: StreamSettings) -> Self {
        net::SocketAddr::new(settings.address, settings.port)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            port: Self::default_port(),
            refresh_interval: Self::default_refresh_interval(),
            mjpeg: MjpegSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub(crate) struct MjpegSettings {
    /// Whether or not the MJPEG video stream should be enabled.
    #[serde(default = "MjpegSettings::default_enabled")]
    pub(crate) enabled: bool,
}

impl MjpegSettings {
    fn default_enabled() -> bool {
        true
    }
}

impl Default for MjpegSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}
