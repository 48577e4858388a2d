// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};
use warp::filters::BoxedFilter;
use warp::reply::{Reply, Response};
use warp::Filter;

use crate::acquisition::{Monitor, PaletteSelector};
use crate::buffer::BoundedFrameBuffer;
use crate::frame::FrameStats;
use crate::render::Palette;
use crate::source::ConnectionState;

mod mjpeg;
mod settings;

pub(crate) use mjpeg::MjpegStream;
pub(crate) use settings::StreamSettings;

pub(crate) type FrameBuffer = BoundedFrameBuffer<Bytes>;

/// Moves frames from the buffer to the MJPEG viewers on its own schedule.
///
/// The pump never waits for the acquisition side. An empty buffer just means there's nothing new
/// to show this time around.
#[derive(Debug)]
pub(crate) struct PresentationPump {
    buffer: Arc<FrameBuffer>,
    mjpeg: MjpegStream,
    refresh_interval: Duration,
    published: u64,
}

impl PresentationPump {
    pub(crate) fn new(
        buffer: Arc<FrameBuffer>,
        mjpeg: MjpegStream,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            mjpeg,
            refresh_interval,
            published: 0,
        }
    }

    /// Take the oldest frame out of the buffer and send it to viewers.
    ///
    /// Returns whether there was a frame to send.
    pub(crate) fn step(&mut self) -> bool {
        if self.buffer.full() {
            debug!(
                dropped = self.buffer.dropped(),
                "frames are arriving faster than they are streamed"
            );
        }
        match self.buffer.get() {
            Some(jpeg) => {
                self.mjpeg.send_frame(&jpeg);
                self.published += 1;
                trace!(
                    published = self.published,
                    viewers = self.mjpeg.receiver_count(),
                    "published frame"
                );
                true
            }
            None => false,
        }
    }

    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.step();
        }
    }
}

#[derive(Debug, Serialize)]
struct BufferStatus {
    size: usize,
    capacity: usize,
    filled: bool,
    dropped: u64,
}

/// The body of the status endpoint.
#[derive(Debug, Serialize)]
struct Status {
    state: ConnectionState,
    palette: Palette,
    buffer: BufferStatus,
    /// Temperature summary of the latest frame, if there's been one yet.
    frame: Option<FrameStats>,
}

impl Status {
    fn snapshot(monitor: &Monitor, buffer: &FrameBuffer) -> Self {
        Self {
            state: monitor.connection_state(),
            palette: monitor.palette(),
            buffer: BufferStatus {
                size: buffer.size(),
                capacity: buffer.capacity(),
                filled: buffer.is_filled(),
                dropped: buffer.dropped(),
            },
            frame: monitor.latest_stats(),
        }
    }
}

/// `GET /status`
pub(crate) fn status_route(
    monitor: Monitor,
    buffer: Arc<FrameBuffer>,
) -> BoxedFilter<(Response,)> {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&Status::snapshot(&monitor, &buffer)).into_response())
        .boxed()
}

/// `PUT /palette/<name or index>`
pub(crate) fn palette_route(selector: PaletteSelector) -> BoxedFilter<(Response,)> {
    warp::path!("palette" / String)
        .and(warp::put())
        .map(move |requested: String| {
            match selector.set_name(&requested) {
                Ok(palette) => {
                    let body = serde_json::json!({ "palette": palette });
                    warp::reply::json(&body).into_response()
                }
                Err(err) => {
                    let body = serde_json::json!({ "error": err.to_string() });
                    warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST)
                        .into_response()
                }
            }
        })
        .boxed()
}

/// `GET /stream`
pub(crate) fn mjpeg_route(mjpeg: MjpegStream) -> BoxedFilter<(Response,)> {
    warp::path("stream")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::with_header(
                Response::new(mjpeg.body()),
                "Content-Type",
                mjpeg.content_type(),
            )
            .into_response()
        })
        .boxed()
}
