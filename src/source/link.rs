// SPDX-License-Identifier: GPL-3.0-or-later
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{namespace_index, DataSource, LinkSettings, NodeId};

/// The most doublings applied to the reconnect delay. Past this the cap always wins anyways.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,

    /// The acquisition worker stopped abnormally. Nothing changes this until it is restarted.
    Faulted,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub(crate) enum LinkError {
    /// A read was requested without an established connection.
    NotConnected,

    /// A request to the data source took longer than the request timeout.
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    /// The data source returned an error, or the transport failed.
    Transport(anyhow::Error),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotConnected => write!(f, "not connected to the data source"),
            LinkError::Timeout { operation, limit } => {
                write!(f, "{} timed out after {:?}", operation, limit)
            }
            LinkError::Transport(err) => write!(f, "{:#}", err),
        }
    }
}

impl StdError for LinkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            LinkError::Transport(err) => Some(&**err),
            _ => None,
        }
    }
}

/// Run one data source request, treating a timeout the same as a failed request.
async fn bounded<T, F>(operation: &'static str, limit: Duration, request: F) -> Result<T, LinkError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(LinkError::Transport(
            err.context(format!("{} request failed", operation)),
        )),
        Err(_) => Err(LinkError::Timeout { operation, limit }),
    }
}

/// The connection to a [`DataSource`], and the thermal data item on it.
///
/// ```text
/// Disconnected --connect()--> Connecting --ok--> Connected
///       ^                         |                  |
///       +---------error-----------+-----read error---+
/// ```
///
/// A failed connection is not retried until the reconnect delay has passed. The delay is
/// measured from the later of the last connection attempt and the moment the connection was
/// lost, and doubles with each consecutive failed attempt up to the configured maximum.
#[derive(Debug)]
pub(crate) struct SensorLink {
    source: Box<dyn DataSource>,
    settings: LinkSettings,
    state: ConnectionState,
    node: Option<NodeId>,
    retry_from: Option<Instant>,
    failures: u32,
}

impl SensorLink {
    pub(crate) fn new(source: Box<dyn DataSource>, settings: LinkSettings) -> Self {
        Self {
            source,
            settings,
            state: ConnectionState::Disconnected,
            node: None,
            retry_from: None,
            failures: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// The resolved handle for the thermal data item, if connected.
    pub(crate) fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    /// Consecutive failed connection attempts.
    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// How long to wait after the last attempt (or loss of connection) before connecting again.
    pub(crate) fn current_delay(&self) -> Duration {
        let base = self.settings.reconnect_delay;
        let shift = self.failures.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        base.checked_mul(1 << shift)
            .unwrap_or(Duration::MAX)
            .min(self.settings.max_reconnect_delay())
    }

    /// Whether a connection attempt should be made at `now`.
    pub(crate) fn reconnect_due(&self, now: Instant) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        match self.retry_from {
            None => true,
            Some(from) => now.saturating_duration_since(from) >= self.current_delay(),
        }
    }

    /// Connect if disconnected and the reconnect delay has passed.
    ///
    /// Connection errors are logged, not returned. Returns whether the link is connected
    /// afterwards.
    pub(crate) async fn ensure_connected(&mut self) -> bool {
        if self.reconnect_due(Instant::now()) {
            if let Err(err) = self.connect().await {
                warn!(
                    error = %err,
                    failures = self.failures,
                    retry_in = ?self.current_delay(),
                    "unable to connect to data source"
                );
            }
        }
        self.state == ConnectionState::Connected
    }

    /// Open the data source, find the configured namespace and resolve the thermal data item.
    #[instrument(
        level = "debug",
        skip(self),
        fields(namespace = %self.settings.namespace, item = %self.settings.item)
    )]
    pub(crate) async fn connect(&mut self) -> Result<(), LinkError> {
        self.state = ConnectionState::Connecting;
        self.node = None;
        self.retry_from = Some(Instant::now());
        match self.establish().await {
            Ok(node) => {
                info!(%node, "connected to data source");
                self.node = Some(node);
                self.state = ConnectionState::Connected;
                self.failures = 0;
                Ok(())
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn establish(&mut self) -> Result<NodeId, LinkError> {
        let limit = self.settings.request_timeout;
        bounded("open", limit, self.source.open()).await?;
        let namespaces = bounded("namespace_array", limit, self.source.namespace_array()).await?;
        debug!(?namespaces, "fetched namespace table");
        let index = namespace_index(
            &namespaces,
            &self.settings.namespace,
            self.settings.default_namespace_index,
        );
        bounded(
            "resolve",
            limit,
            self.source.resolve(index, &self.settings.item),
        )
        .await
    }

    /// Read the current values of the thermal data item.
    ///
    /// Any failure drops the connection; the next attempt has to go through [`connect`] again.
    ///
    /// [`connect`]: SensorLink::connect
    #[instrument(level = "trace", skip(self))]
    pub(crate) async fn read(&mut self) -> Result<Vec<f64>, LinkError> {
        let node = match (self.state, &self.node) {
            (ConnectionState::Connected, Some(node)) => node.clone(),
            _ => return Err(LinkError::NotConnected),
        };
        let limit = self.settings.request_timeout;
        match bounded("read", limit, self.source.read_values(&node)).await {
            Ok(values) => Ok(values),
            Err(err) => {
                self.lose_connection();
                Err(err)
            }
        }
    }

    fn lose_connection(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.node = None;
        self.retry_from = Some(Instant::now());
    }

    /// Close the data source. Errors are logged and otherwise ignored.
    pub(crate) async fn disconnect(&mut self) {
        let limit = self.settings.request_timeout;
        match bounded("close", limit, self.source.close()).await {
            Ok(()) => debug!("disconnected from data source"),
            Err(err) => warn!(error = %err, "error while disconnecting from data source"),
        }
        self.state = ConnectionState::Disconnected;
        self.node = None;
    }

    /// Disconnect if connected, or in the middle of connecting.
    ///
    /// Returns whether a disconnect was made.
    pub(crate) async fn shutdown(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.disconnect().await;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn into_source(self) -> Box<dyn DataSource> {
        self.source
    }
}
