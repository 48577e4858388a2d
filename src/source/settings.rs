// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::{TryFrom, TryInto};
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use url::Url;

use crate::frame::SensorGeometry;

use super::{DataSource, SyntheticSource, TcpSource};

pub(crate) const DEFAULT_PORT: u16 = 4840;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "Url")]
pub(crate) struct SourceUrl(Url);

impl TryFrom<Url> for SourceUrl {
    type Error = anyhow::Error;

    /// Attempt to create a [SourceUrl] from a [Url].
    ///
    /// Only the 'tcp' scheme is valid, and the default port is filled in if one isn't given.
    fn try_from(mut url: Url) -> anyhow::Result<Self> {
        match url.scheme() {
            "tcp" => (),
            invalid => return Err(anyhow!("invalid scheme '{}'", invalid)),
        }
        if url.host_str().is_none() {
            return Err(anyhow!("the data source address needs a host"));
        }
        if url.port().is_none() {
            url.set_port(Some(DEFAULT_PORT))
                .map_err(|_| anyhow!("unable to set the default data source port"))?;
        }
        Ok(Self(url))
    }
}

impl FromStr for SourceUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let url: Url = s.parse()?;
        url.try_into()
    }
}

impl SourceUrl {
    /// A `host:port` string suitable for `TcpStream::connect`.
    pub(crate) fn host_port(&self) -> String {
        // Both are checked when the SourceUrl is created
        format!(
            "{}:{}",
            self.0.host_str().unwrap_or_default(),
            self.0.port().unwrap_or(DEFAULT_PORT)
        )
    }

    pub(crate) fn as_url(&self) -> &Url {
        &self.0
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub(crate) enum SourceKind {
    /// A data source server reachable over TCP.
    Tcp { address: SourceUrl },

    /// A generated moving warm spot, for running without a sensor.
    Synthetic,
}

/// Settings for locating the thermal data item and keeping the connection alive.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct LinkSettings {
    /// The namespace the sensor's item is registered under.
    #[serde(default = "LinkSettings::default_namespace")]
    pub(crate) namespace: String,

    /// The namespace index to use if `namespace` is missing from the server's namespace table.
    #[serde(default = "LinkSettings::default_namespace_index")]
    pub(crate) default_namespace_index: u16,

    /// The name of the item holding the temperature array.
    #[serde(default = "LinkSettings::default_item")]
    pub(crate) item: String,

    /// How long any single request may take, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "LinkSettings::default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// How long to wait before reconnecting, in seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "LinkSettings::default_reconnect_delay")]
    pub(crate) reconnect_delay: Duration,

    /// The longest the reconnect delay may grow to after repeated failures, in seconds.
    ///
    /// Defaults to `reconnect_delay`, i.e. no backoff.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(default)]
    pub(crate) max_reconnect_delay: Option<Duration>,
}

impl LinkSettings {
    fn default_namespace() -> String {
        "BeagleBoneThermal".to_string()
    }

    fn default_namespace_index() -> u16 {
        2
    }

    fn default_item() -> String {
        "ThermalData".to_string()
    }

    fn default_request_timeout() -> Duration {
        Duration::from_secs(2)
    }

    fn default_reconnect_delay() -> Duration {
        Duration::from_secs(5)
    }

    pub(crate) fn max_reconnect_delay(&self) -> Duration {
        self.max_reconnect_delay
            .unwrap_or(self.reconnect_delay)
            .max(self.reconnect_delay)
    }

    #[cfg(test)]
    pub(crate) fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = Some(delay);
        self
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            default_namespace_index: Self::default_namespace_index(),
            item: Self::default_item(),
            request_timeout: Self::default_request_timeout(),
            reconnect_delay: Self::default_reconnect_delay(),
            max_reconnect_delay: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct SourceSettings {
    #[serde(flatten)]
    pub(crate) kind: SourceKind,

    #[serde(flatten)]
    pub(crate) link: LinkSettings,
}

impl SourceSettings {
    pub(crate) fn create_source(&self, geometry: SensorGeometry) -> Box<dyn DataSource> {
        match &self.kind {
            SourceKind::Tcp { address } => Box::new(TcpSource::new(address.clone(), geometry)),
            SourceKind::Synthetic => Box::new(SyntheticSource::new(
                geometry,
                &self.link.namespace,
                &self.link.item,
            )),
        }
    }

    /// A short description of where data comes from, for logging.
    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            SourceKind::Tcp { address } => address.as_url().to_string(),
            SourceKind::Synthetic => "synthetic".to_string(),
        }
    }
}
