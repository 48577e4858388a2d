// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::TryFrom;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context as _};
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Dispatch};

use crate::buffer::BoundedFrameBuffer;
use crate::frame::{FrameStats, RawFrame};
use crate::render::{FrameTransformer, Palette, PaletteError};
use crate::source::{ConnectionState, DataSource, LinkSettings, SensorLink};

mod settings;
mod worker;

pub(crate) use settings::AcquisitionSettings;

use worker::{FramePublisher, StatePublisher, Worker};

/// Read-only view of a running acquisition, cheap to clone and share with other tasks.
#[derive(Clone, Debug)]
pub(crate) struct Monitor {
    state: watch::Receiver<ConnectionState>,
    latest: watch::Receiver<Option<Arc<RawFrame>>>,
    palette: watch::Receiver<Palette>,
}

impl Monitor {
    pub(crate) fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that is notified whenever the connection state changes.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The most recent well-formed frame read from the sensor.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn latest_frame(&self) -> Option<Arc<RawFrame>> {
        self.latest.borrow().clone()
    }

    pub(crate) fn latest_stats(&self) -> Option<FrameStats> {
        self.latest.borrow().as_ref().map(|frame| frame.stats())
    }

    pub(crate) fn palette(&self) -> Palette {
        *self.palette.borrow()
    }
}

/// Changes the palette used for newly rendered frames.
#[derive(Clone, Debug)]
pub(crate) struct PaletteSelector(Arc<watch::Sender<Palette>>);

impl PaletteSelector {
    fn select(&self, palette: Palette) -> Palette {
        self.0.send_replace(palette);
        info!(%palette, "palette changed");
        palette
    }

    /// Select a palette by its index. An invalid index leaves the current palette in place.
    pub(crate) fn set_index(&self, index: usize) -> Result<Palette, PaletteError> {
        Palette::try_from(index).map(|palette| self.select(palette))
    }

    /// Select a palette by its name. An unknown name leaves the current palette in place.
    pub(crate) fn set_name(&self, name: &str) -> Result<Palette, PaletteError> {
        name.parse().map(|palette| self.select(palette))
    }
}

#[derive(Debug)]
struct Running {
    stop: watch::Sender<bool>,
    done: mpsc::Receiver<Box<dyn DataSource>>,
    thread: thread::JoinHandle<()>,
}

/// Owns the acquisition worker thread and the channels used to talk to it.
///
/// The worker polls the data source through a [`SensorLink`], renders each frame, and adds it to
/// the shared buffer. All of the methods here are meant to be called from outside the worker.
#[derive(Debug)]
pub(crate) struct Acquisition {
    settings: AcquisitionSettings,
    link_settings: LinkSettings,
    transformer: FrameTransformer,
    buffer: Arc<BoundedFrameBuffer<Bytes>>,
    dispatch: Dispatch,
    /// The data source, when the worker isn't using it.
    source: Option<Box<dyn DataSource>>,
    palette: PaletteSelector,
    state: StatePublisher,
    latest: FramePublisher,
    monitor: Monitor,
    running: Option<Running>,
}

impl Acquisition {
    pub(crate) fn new(
        source: Box<dyn DataSource>,
        link_settings: LinkSettings,
        transformer: FrameTransformer,
        buffer: Arc<BoundedFrameBuffer<Bytes>>,
        settings: AcquisitionSettings,
        palette: Palette,
        dispatch: Dispatch,
    ) -> Self {
        let (palette_tx, palette_rx) = watch::channel(palette);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (latest_tx, latest_rx) = watch::channel(None);
        Self {
            settings,
            link_settings,
            transformer,
            buffer,
            dispatch,
            source: Some(source),
            palette: PaletteSelector(Arc::new(palette_tx)),
            state: Arc::new(state_tx),
            latest: Arc::new(latest_tx),
            monitor: Monitor {
                state: state_rx,
                latest: latest_rx,
                palette: palette_rx,
            },
            running: None,
        }
    }

    /// Start the worker thread.
    ///
    /// Fails if the worker is already running, or if a previous worker never gave the data
    /// source back.
    pub(crate) fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            bail!("acquisition is already running");
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("the data source was lost by a worker that didn't stop"))?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel();
        self.state.send_replace(ConnectionState::Disconnected);
        let worker = Worker {
            link: SensorLink::new(source, self.link_settings.clone()),
            transformer: self.transformer.clone(),
            buffer: Arc::clone(&self.buffer),
            settings: self.settings,
            palette: self.monitor.palette.clone(),
            state: Arc::clone(&self.state),
            latest: Arc::clone(&self.latest),
            last_fetch: None,
        };
        let dispatch = self.dispatch.clone();
        let thread = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let source = tracing::dispatcher::with_default(&dispatch, || {
                    let _span = info_span!("acquisition").entered();
                    info!("acquisition started");
                    worker.run(stop_rx)
                });
                // Nobody may be waiting anymore if stopping timed out.
                let _ = done_tx.send(source);
            })
            .context("unable to spawn the acquisition thread")?;
        self.running = Some(Running {
            stop: stop_tx,
            done: done_rx,
            thread,
        });
        Ok(())
    }

    /// Stop the worker thread, waiting up to the shutdown timeout for it to finish.
    ///
    /// Returns `false` if the worker didn't finish in time. It is left to finish on its own, but
    /// the data source goes with it, so the acquisition can't be restarted.
    pub(crate) fn stop(&mut self) -> bool {
        let running = match self.running.take() {
            Some(running) => running,
            None => return true,
        };
        running.stop.send_replace(true);
        match running.done.recv_timeout(self.settings.shutdown_timeout) {
            Ok(source) => {
                self.source = Some(source);
                if running.thread.join().is_err() {
                    warn!("acquisition thread panicked after finishing");
                }
                info!("acquisition stopped");
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.settings.shutdown_timeout,
                    "acquisition worker did not stop in time, detaching it"
                );
                false
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                error!("acquisition thread exited without returning the data source");
                self.state.send_replace(ConnectionState::Faulted);
                let _ = running.thread.join();
                true
            }
        }
    }

    pub(crate) fn palette_selector(&self) -> PaletteSelector {
        self.palette.clone()
    }

    pub(crate) fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }
}

/// Direct controls and snapshots for code holding the handle itself. The server goes through
/// [`Monitor`] and [`PaletteSelector`] instead.
#[cfg_attr(not(test), allow(dead_code))]
impl Acquisition {
    /// Whether the worker thread is still running.
    ///
    /// A worker that stopped by itself after a fault still needs [`stop`] to be called before it
    /// can be started again.
    ///
    /// [`stop`]: Acquisition::stop
    pub(crate) fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.thread.is_finished())
            .unwrap_or(false)
    }

    pub(crate) fn set_palette(&self, index: usize) -> Result<Palette, PaletteError> {
        self.palette.set_index(index)
    }

    pub(crate) fn palette(&self) -> Palette {
        self.monitor.palette()
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.monitor.connection_state()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.monitor.subscribe_state()
    }

    pub(crate) fn latest_frame(&self) -> Option<Arc<RawFrame>> {
        self.monitor.latest_frame()
    }

    pub(crate) fn latest_stats(&self) -> Option<FrameStats> {
        self.monitor.latest_stats()
    }

    pub(crate) fn buffer(&self) -> &Arc<BoundedFrameBuffer<Bytes>> {
        &self.buffer
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if self.running.is_some() && !self.stop() {
            warn!("acquisition dropped without stopping cleanly");
        }
    }
}
