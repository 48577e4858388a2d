// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod link;
#[cfg(test)]
pub(crate) mod mock;
mod settings;
mod synthetic;
mod tcp;

pub(crate) use link::{ConnectionState, SensorLink};
pub(crate) use settings::{LinkSettings, SourceSettings};
pub(crate) use synthetic::SyntheticSource;
pub(crate) use tcp::TcpSource;

/// A resolved address for an item on a data source.
#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub(crate) struct NodeId {
    pub(crate) namespace: u16,
    pub(crate) name: String,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};s={}", self.namespace, self.name)
    }
}

/// A remote service exposing named items that can be read.
///
/// Implementations only move requests and responses. Timeouts, retries, and connection state
/// are handled by [`SensorLink`].
#[async_trait]
pub(crate) trait DataSource: fmt::Debug + Send {
    /// Open (or re-open) the transport. Any previous connection is discarded.
    async fn open(&mut self) -> anyhow::Result<()>;

    /// The server's namespace table. A namespace's index is its position in this list.
    async fn namespace_array(&mut self) -> anyhow::Result<Vec<String>>;

    /// Look up the node for an item in the given namespace.
    async fn resolve(&mut self, namespace: u16, name: &str) -> anyhow::Result<NodeId>;

    /// Read the current value of a node as a flat array of numbers.
    async fn read_values(&mut self, node: &NodeId) -> anyhow::Result<Vec<f64>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Find the index of `namespace` in a server's namespace table.
///
/// If the namespace isn't listed, `fallback` is used instead. Some servers register custom
/// namespaces without publishing them in the table, and the first custom namespace is
/// conventionally index 2, so a missing entry is logged rather than treated as an error.
pub(crate) fn namespace_index(namespaces: &[String], namespace: &str, fallback: u16) -> u16 {
    match namespaces.iter().position(|entry| entry == namespace) {
        Some(index) => index as u16,
        None => {
            tracing::warn!(
                namespace,
                fallback,
                "namespace not found in server namespace table, using fallback index"
            );
            fallback
        }
    }
}
