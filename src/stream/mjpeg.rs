// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::StreamExt;
use hyper::Body;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Fans JPEG frames out to any number of `multipart/x-mixed-replace` HTTP responses.
///
/// Viewers only ever see the newest frame. A slow viewer skips frames instead of holding up the
/// others.
#[derive(Clone, Debug)]
pub(crate) struct MjpegStream {
    boundary: String,
    rx_handle: watch::Receiver<Bytes>,
    tx_handle: Arc<watch::Sender<Bytes>>,
}

impl MjpegStream {
    pub(crate) fn new() -> Self {
        let (tx, rx) = watch::channel(Bytes::default());
        Self {
            boundary: "thermocast_mjpeg_boundary".to_string(),
            rx_handle: rx,
            tx_handle: Arc::new(tx),
        }
    }

    /// A response body that streams every frame sent after it was created.
    pub(crate) fn body(&self) -> Body {
        let jpeg_stream = WatchStream::new(self.rx_handle.clone());
        let result_stream = jpeg_stream.map(Result::<Bytes, hyper::http::Error>::Ok);
        Body::wrap_stream(result_stream)
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    /// Wrap a JPEG image as one part of the multipart stream.
    fn part(&self, jpeg: &[u8]) -> Bytes {
        let header = format!(
            "\r\n--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            self.boundary,
            jpeg.len()
        );
        let mut part = BytesMut::with_capacity(header.len() + jpeg.len());
        part.put_slice(header.as_bytes());
        part.put_slice(jpeg);
        part.freeze()
    }

    /// Send a frame to every connected viewer.
    pub(crate) fn send_frame(&self, jpeg: &[u8]) {
        self.tx_handle.send_replace(self.part(jpeg));
    }

    /// How many response bodies are currently streaming, plus the handles held by this stream.
    pub(crate) fn receiver_count(&self) -> usize {
        self.tx_handle.receiver_count()
    }

    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<Bytes> {
        self.rx_handle.clone()
    }
}

#[cfg(test)]
mod test {
    use super::MjpegStream;

    #[test]
    fn part_framing() {
        let stream = MjpegStream::new();
        let part = stream.part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected_header = concat!(
            "\r\n--thermocast_mjpeg_boundary\r\n",
            "Content-Type: image/jpeg\r\n",
            "Content-Length: 4\r\n\r\n"
        );
        assert_eq!(&part[..expected_header.len()], expected_header.as_bytes());
        assert_eq!(&part[expected_header.len()..], &[0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn content_type_names_boundary() {
        let stream = MjpegStream::new();
        assert_eq!(
            stream.content_type(),
            "multipart/x-mixed-replace; boundary=thermocast_mjpeg_boundary"
        );
    }

    #[tokio::test]
    async fn viewers_get_latest_frame() {
        let stream = MjpegStream::new();
        let mut viewer = stream.subscribe();
        stream.send_frame(b"first");
        stream.send_frame(b"second");
        viewer.changed().await.unwrap();
        let latest = viewer.borrow().clone();
        assert!(latest.ends_with(b"second"));
    }

    #[test]
    fn clones_share_channel() {
        let stream = MjpegStream::new();
        let other = stream.clone();
        let viewer = stream.subscribe();
        other.send_frame(b"frame");
        assert!(viewer.borrow().ends_with(b"frame"));
        assert_eq!(stream.receiver_count(), 3);
    }
}
