// SPDX-License-Identifier: GPL-3.0-or-later
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub(crate) struct AcquisitionSettings {
    /// How often the worker wakes up to check on the connection, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "AcquisitionSettings::default_poll_interval")]
    pub(crate) poll_interval: Duration,

    /// The minimum time between reads from the sensor, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "AcquisitionSettings::default_fetch_interval")]
    pub(crate) fetch_interval: Duration,

    /// How long stopping waits for the worker to finish, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "AcquisitionSettings::default_shutdown_timeout")]
    pub(crate) shutdown_timeout: Duration,

    /// How many rendered frames are kept for the presentation side. The oldest is dropped when
    /// the buffer is full.
    #[serde(default = "AcquisitionSettings::default_buffer_capacity")]
    pub(crate) buffer_capacity: NonZeroUsize,
}

impl AcquisitionSettings {
    fn default_poll_interval() -> Duration {
        Duration::from_millis(30)
    }

    fn default_fetch_interval() -> Duration {
        Duration::from_millis(100)
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(2)
    }

    fn default_buffer_capacity() -> NonZeroUsize {
        // Ten frames is one second of video at the default fetch interval
        NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN)
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Self::default_poll_interval(),
            fetch_interval: Self::default_fetch_interval(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            buffer_capacity: Self::default_buffer_capacity(),
        }
    }
}
