// SPDX-License-Identifier: GPL-3.0-or-later
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt as _;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::BoundedFrameBuffer;
use crate::frame::RawFrame;
use crate::render::{FrameTransformer, Palette};
use crate::source::{ConnectionState, DataSource, SensorLink};

use super::AcquisitionSettings;

pub(super) type StatePublisher = Arc<watch::Sender<ConnectionState>>;
pub(super) type FramePublisher = Arc<watch::Sender<Option<Arc<RawFrame>>>>;

/// Everything the acquisition thread owns while it runs.
#[derive(Debug)]
pub(super) struct Worker {
    pub(super) link: SensorLink,
    pub(super) transformer: FrameTransformer,
    pub(super) buffer: Arc<BoundedFrameBuffer<Bytes>>,
    pub(super) settings: AcquisitionSettings,
    pub(super) palette: watch::Receiver<Palette>,
    pub(super) state: StatePublisher,
    pub(super) latest: FramePublisher,
    pub(super) last_fetch: Option<Instant>,
}

/// Resolves once a stop has been requested, or the handle has gone away.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

impl Worker {
    fn publish_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            debug!(%state, "connection state changed");
            self.state.send_replace(state);
        }
    }

    /// Run until told to stop. Returns the data source so it can be reused by the next run.
    ///
    /// This is the body of the acquisition thread: it builds its own single threaded runtime,
    /// and always tears the connection down before returning, even if the loop panics.
    pub(super) fn run(mut self, mut stop: watch::Receiver<bool>) -> Box<dyn DataSource> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "unable to start the acquisition runtime");
                self.publish_state(ConnectionState::Faulted);
                return self.link.into_source();
            }
        };
        runtime.block_on(async {
            let outcome = AssertUnwindSafe(self.poll_until_stopped(&mut stop))
                .catch_unwind()
                .await;
            // A panic can leave the link anywhere, including half-way through connecting.
            if self.link.shutdown().await {
                info!("closed data source connection");
            }
            match outcome {
                Ok(()) => self.publish_state(ConnectionState::Disconnected),
                Err(_) => {
                    error!("acquisition loop panicked");
                    self.publish_state(ConnectionState::Faulted);
                }
            }
        });
        self.link.into_source()
    }

    async fn poll_until_stopped(&mut self, stop: &mut watch::Receiver<bool>) {
        let poll_interval = self.settings.poll_interval;
        loop {
            // Any in-flight connect or read is dropped when a stop comes in. Neither touches the
            // buffer until they've completed.
            tokio::select! {
                biased;
                _ = stop_requested(stop) => break,
                _ = self.tick() => {}
            }
            tokio::select! {
                biased;
                _ = stop_requested(stop) => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        debug!("acquisition loop stopping");
    }

    async fn tick(&mut self) {
        if self.link.reconnect_due(Instant::now()) {
            self.publish_state(ConnectionState::Connecting);
        }
        let connected = self.link.ensure_connected().await;
        self.publish_state(self.link.state());
        if !connected {
            return;
        }
        let now = Instant::now();
        let fetch_due = match self.last_fetch {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.fetch_interval,
        };
        if fetch_due {
            self.last_fetch = Some(now);
            self.fetch().await;
            self.publish_state(self.link.state());
        }
    }

    /// Read one frame, render it, and add it to the buffer.
    async fn fetch(&mut self) {
        let values = match self.link.read().await {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "lost connection to data source");
                return;
            }
        };
        // A malformed frame only costs this frame, the connection is fine.
        let frame = match self.transformer.validate(&values) {
            Ok(frame) => Arc::new(frame),
            Err(err) => {
                warn!(error = %err, "discarding malformed frame");
                return;
            }
        };
        self.latest.send_replace(Some(Arc::clone(&frame)));
        let palette = *self.palette.borrow();
        match self.transformer.process(&frame, palette) {
            Ok(rendered) => {
                trace!(
                    bytes = rendered.jpeg.len(),
                    %palette,
                    stats = ?self.transformer.summarize(&values),
                    "rendered frame"
                );
                self.buffer.put(rendered.jpeg);
            }
            Err(err) => warn!(error = %err, "unable to render frame"),
        }
    }
}
