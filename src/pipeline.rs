// SPDX-License-Identifier: GPL-3.0-or-later
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{anyhow, Context as _};
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{debug, info, info_span, warn, Dispatch};
use tracing_futures::Instrument;
use warp::Filter;

use crate::acquisition::Acquisition;
use crate::render::FrameTransformer;
use crate::settings::Settings;
use crate::stream::{self, FrameBuffer, MjpegStream, PresentationPump};
use crate::util::flatten_join_result;

type InnerTask = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TaskList = FuturesUnordered<InnerTask>;

/// The whole application: the acquisition worker plus the tasks serving its frames.
///
/// Awaiting a pipeline only finishes if one of its tasks fails. Call [`shutdown`] afterwards (or
/// instead) to stop the acquisition worker.
///
/// [`shutdown`]: Pipeline::shutdown
pub(crate) struct Pipeline {
    acquisition: Option<Acquisition>,
    buffer: Arc<FrameBuffer>,
    local_address: SocketAddr,
    tasks: TaskList,
}

impl Pipeline {
    /// Start acquiring frames and serving them. Must be called from within a tokio runtime.
    pub(crate) fn new(config: Settings, dispatch: Dispatch) -> anyhow::Result<Self> {
        let buffer = Arc::new(FrameBuffer::new(config.acquisition.buffer_capacity));
        let transformer = FrameTransformer::new(config.sensor, &config.render)
            .context("Error setting up the frame renderer")?;
        let (width, height) = transformer.output_size();
        info!(
            source = %config.source.describe(),
            width,
            height,
            "starting acquisition"
        );
        let mut acquisition = Acquisition::new(
            config.source.create_source(config.sensor),
            config.source.link.clone(),
            transformer,
            Arc::clone(&buffer),
            config.acquisition,
            config.render.palette,
            dispatch,
        );
        acquisition
            .start()
            .context("Error starting acquisition worker")?;
        let tasks = TaskList::new();
        let mut routes = vec![
            stream::status_route(acquisition.monitor(), Arc::clone(&buffer)),
            stream::palette_route(acquisition.palette_selector()),
        ];
        if config.streams.mjpeg.enabled {
            let mjpeg = MjpegStream::new();
            routes.push(stream::mjpeg_route(mjpeg.clone()));
            let pump = PresentationPump::new(
                Arc::clone(&buffer),
                mjpeg,
                config.streams.refresh_interval,
            );
            tasks.push(
                tokio::spawn(pump.run().instrument(info_span!("presentation_pump")))
                    .map(flatten_join_result)
                    .boxed(),
            );
        } else {
            info!("MJPEG stream disabled, frames will only be buffered");
        }
        let combined_route = routes
            .into_iter()
            .reduce(|combined, next| combined.or(next).unify().boxed())
            .ok_or_else(|| anyhow!("problem creating HTTP routes"))?;
        let bind_address: SocketAddr = config.streams.into();
        debug!(address = ?bind_address, "creating warp server");
        let (local_address, server) = warp::serve(combined_route)
            .try_bind_ephemeral(bind_address)
            .with_context(|| format!("Error binding HTTP server to {}", bind_address))?;
        debug!(address = %local_address, "warp server bound");
        tasks.push(
            tokio::spawn(server.instrument(info_span!("warp_server")))
                .map(|res| flatten_join_result(res.map(Ok::<_, anyhow::Error>)))
                .boxed(),
        );
        Ok(Self {
            acquisition: Some(acquisition),
            buffer,
            local_address,
            tasks,
        })
    }

    /// The address the HTTP server is listening on.
    pub(crate) fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Stop the acquisition worker, waiting for it to close its connection.
    pub(crate) async fn shutdown(&mut self) -> anyhow::Result<()> {
        let mut acquisition = match self.acquisition.take() {
            Some(acquisition) => acquisition,
            None => return Ok(()),
        };
        // Stopping blocks while joining the worker thread.
        let stopped = spawn_blocking(move || Ok::<_, anyhow::Error>(acquisition.stop()))
            .map(flatten_join_result)
            .await?;
        if stopped {
            info!("shut down cleanly");
        } else {
            warn!("acquisition worker did not shut down in time");
        }
        let unsent = self.buffer.get_all().len();
        if unsent > 0 {
            debug!(unsent, "discarded frames that were never streamed");
        }
        Ok(())
    }
}

impl Future for Pipeline {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.tasks.poll_next_unpin(cx) {
            Poll::Ready(Some(res)) => {
                debug!(result = ?res, "Pipeline terminating");
                Poll::Ready(res)
            }
            // The server task never finishes on its own, so this only happens if there are no
            // tasks at all.
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}
