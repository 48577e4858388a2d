// SPDX-License-Identifier: GPL-3.0-or-later
use std::f64::consts::PI;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::trace;

use crate::frame::SensorGeometry;

use super::{DataSource, NodeId};

/// Background temperature of generated frames, in degrees Celsius.
const AMBIENT: f64 = 21.5;

/// How much warmer the center of the spot is than the background.
const SPOT_DELTA: f64 = 12.0;

/// How many reads it takes the spot to go around its path once.
const PERIOD: u64 = 240;

/// An in-process data source generating a warm spot wandering across a cool background.
///
/// Frames only depend on how many reads have been made, so a fresh source always produces the
/// same sequence.
#[derive(Debug)]
pub(crate) struct SyntheticSource {
    geometry: SensorGeometry,
    namespace: String,
    item: String,
    reads: u64,
    open: bool,
}

impl SyntheticSource {
    pub(crate) fn new(geometry: SensorGeometry, namespace: &str, item: &str) -> Self {
        Self {
            geometry,
            namespace: namespace.to_string(),
            item: item.to_string(),
            reads: 0,
            open: false,
        }
    }

    /// The frame produced by the `step`th read.
    pub(crate) fn frame(&self, step: u64) -> Vec<f64> {
        let rows = self.geometry.rows as f64;
        let columns = self.geometry.columns as f64;
        let phase = 2.0 * PI * (step % PERIOD) as f64 / PERIOD as f64;
        // A Lissajous path keeps the spot away from simply bouncing along one axis.
        let center_x = (columns - 1.0) * (0.5 + 0.35 * phase.sin());
        let center_y = (rows - 1.0) * (0.5 + 0.35 * (2.0 * phase).sin());
        let sigma = (rows.min(columns) / 6.0).max(1.0);
        let spread = 2.0 * sigma * sigma;
        (0..self.geometry.rows)
            .flat_map(|row| (0..self.geometry.columns).map(move |column| (row, column)))
            .map(|(row, column)| {
                let dx = column as f64 - center_x;
                let dy = row as f64 - center_y;
                AMBIENT + SPOT_DELTA * (-(dx * dx + dy * dy) / spread).exp()
            })
            .collect()
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    async fn open(&mut self) -> anyhow::Result<()> {
        self.open = true;
        Ok(())
    }

    async fn namespace_array(&mut self) -> anyhow::Result<Vec<String>> {
        Ok(vec![
            "http://opcfoundation.org/UA/".to_string(),
            "urn:thermocast:synthetic".to_string(),
            self.namespace.clone(),
        ])
    }

    async fn resolve(&mut self, namespace: u16, name: &str) -> anyhow::Result<NodeId> {
        if name != self.item {
            return Err(anyhow!("no item named '{}'", name));
        }
        Ok(NodeId {
            namespace,
            name: name.to_string(),
        })
    }

    async fn read_values(&mut self, node: &NodeId) -> anyhow::Result<Vec<f64>> {
        if !self.open {
            return Err(anyhow!("synthetic source is closed"));
        }
        trace!(%node, step = self.reads, "generating synthetic frame");
        let values = self.frame(self.reads);
        self.reads = self.reads.wrapping_add(1);
        Ok(values)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.open = false;
        Ok(())
    }
}
