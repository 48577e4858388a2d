// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::frame::SensorGeometry;

use super::settings::SourceUrl;
use super::{DataSource, NodeId};

/// Requests are sent as one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    NamespaceArray,
    Resolve { namespace: u16, name: &'a str },
    Read { node: &'a NodeId },
}

/// Each request gets exactly one response line.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum Response {
    Namespaces(Vec<String>),
    Node(NodeId),
    Values(Vec<f64>),
    Error(String),
}

/// Room for one sample in a `values` reply, including the separator.
const BYTES_PER_SAMPLE: usize = 32;

/// Room for everything in a reply that isn't a sample.
const REPLY_OVERHEAD: usize = 16 * 1024;

/// The longest reply line accepted for a sensor of the given size.
fn max_reply_len(geometry: SensorGeometry) -> usize {
    geometry.sample_count() * BYTES_PER_SAMPLE + REPLY_OVERHEAD
}

async fn exchange(
    stream: &mut BufStream<TcpStream>,
    line: &[u8],
    max_reply_len: usize,
) -> anyhow::Result<Vec<u8>> {
    stream.write_all(line).await?;
    stream.flush().await?;
    let mut reply = Vec::new();
    let read = (&mut *stream)
        .take(max_reply_len as u64)
        .read_until(b'\n', &mut reply)
        .await?;
    if reply.last() != Some(&b'\n') {
        if read == 0 {
            bail!("connection closed by data source");
        } else if read >= max_reply_len {
            bail!("reply from data source is longer than {} bytes", max_reply_len);
        } else {
            bail!("connection closed by data source in the middle of a reply");
        }
    }
    Ok(reply)
}

/// A data source server speaking newline-delimited JSON over TCP.
#[derive(Debug)]
pub(crate) struct TcpSource {
    address: SourceUrl,
    max_reply_len: usize,
    stream: Option<BufStream<TcpStream>>,
}

impl TcpSource {
    pub(crate) fn new(address: SourceUrl, geometry: SensorGeometry) -> Self {
        Self {
            address,
            max_reply_len: max_reply_len(geometry),
            stream: None,
        }
    }

    async fn request(&mut self, request: Request<'_>) -> anyhow::Result<Response> {
        let stream = match &mut self.stream {
            Some(stream) => stream,
            None => bail!("not connected to {}", self.address.as_url()),
        };
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        trace!(?request, "sending request");
        let reply = match exchange(stream, &line, self.max_reply_len).await {
            Ok(reply) => reply,
            Err(err) => {
                // The stream is in an unknown state after a failure, so it can't be reused.
                self.stream = None;
                return Err(err);
            }
        };
        let response: Response =
            serde_json::from_slice(&reply).context("malformed response from data source")?;
        match response {
            Response::Error(message) => Err(anyhow!("data source error: {}", message)),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl DataSource for TcpSource {
    async fn open(&mut self) -> anyhow::Result<()> {
        self.stream = None;
        let host_port = self.address.host_port();
        let stream = TcpStream::connect(&host_port)
            .await
            .with_context(|| format!("unable to connect to {}", host_port))?;
        stream.set_nodelay(true)?;
        debug!(address = %host_port, "opened data source connection");
        self.stream = Some(BufStream::new(stream));
        Ok(())
    }

    async fn namespace_array(&mut self) -> anyhow::Result<Vec<String>> {
        match self.request(Request::NamespaceArray).await? {
            Response::Namespaces(namespaces) => Ok(namespaces),
            other => Err(anyhow!("expected a namespace table, got {:?}", other)),
        }
    }

    async fn resolve(&mut self, namespace: u16, name: &str) -> anyhow::Result<NodeId> {
        match self.request(Request::Resolve { namespace, name }).await? {
            Response::Node(node) => Ok(node),
            other => Err(anyhow!("expected a node, got {:?}", other)),
        }
    }

    async fn read_values(&mut self, node: &NodeId) -> anyhow::Result<Vec<f64>> {
        match self.request(Request::Read { node }).await? {
            Response::Values(values) => Ok(values),
            other => Err(anyhow!("expected values, got {:?}", other)),
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::{max_reply_len, Request, Response, TcpSource};
    use crate::frame::SensorGeometry;
    use crate::source::{DataSource, LinkSettings, NodeId, SensorLink};

    fn node() -> NodeId {
        NodeId {
            namespace: 2,
            name: "ThermalData".to_string(),
        }
    }

    #[test]
    fn request_format() {
        let encoded = serde_json::to_value(&Request::NamespaceArray).unwrap();
        assert_eq!(encoded, json!({"op": "namespace_array"}));
        let encoded = serde_json::to_value(&Request::Resolve {
            namespace: 2,
            name: "ThermalData",
        })
        .unwrap();
        assert_eq!(
            encoded,
            json!({"op": "resolve", "namespace": 2, "name": "ThermalData"})
        );
        let node = node();
        let encoded = serde_json::to_value(&Request::Read { node: &node }).unwrap();
        assert_eq!(
            encoded,
            json!({"op": "read", "node": {"namespace": 2, "name": "ThermalData"}})
        );
    }

    #[test]
    fn response_format() {
        let parsed: Response = serde_json::from_str(r#"{"values": [1.5, 2, -3]}"#).unwrap();
        assert_eq!(parsed, Response::Values(vec![1.5, 2.0, -3.0]));
        let parsed: Response = serde_json::from_str(r#"{"error": "nope"}"#).unwrap();
        assert_eq!(parsed, Response::Error("nope".to_string()));
    }

    /// Answer requests like a sensor server would, for `connections` connections.
    async fn serve(listener: TcpListener, connections: usize, values: Vec<f64>) {
        for _ in 0..connections {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                let request: Value = serde_json::from_str(&line).unwrap();
                let response = match request["op"].as_str() {
                    Some("namespace_array") => {
                        json!({"namespaces": ["http://opcfoundation.org/UA/", "BeagleBoneThermal"]})
                    }
                    Some("resolve") if request["name"] == "ThermalData" => json!({
                        "node": {"namespace": request["namespace"], "name": "ThermalData"}
                    }),
                    Some("read") => json!({ "values": values }),
                    _ => json!({"error": "unknown request"}),
                };
                let mut encoded = serde_json::to_vec(&response).unwrap();
                encoded.push(b'\n');
                writer.write_all(&encoded).await.unwrap();
            }
        }
    }

    async fn listener() -> (TcpListener, TcpSource) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = format!("tcp://127.0.0.1:{}", port).parse().unwrap();
        (listener, TcpSource::new(address, SensorGeometry::default()))
    }

    #[tokio::test]
    async fn full_exchange() {
        let (listener, mut source) = listener().await;
        let server = tokio::spawn(serve(listener, 1, vec![20.0, 21.0, 22.0]));
        source.open().await.unwrap();
        let namespaces = source.namespace_array().await.unwrap();
        assert_eq!(namespaces[1], "BeagleBoneThermal");
        let resolved = source.resolve(1, "ThermalData").await.unwrap();
        assert_eq!(resolved.namespace, 1);
        let values = source.read_values(&resolved).await.unwrap();
        assert_eq!(values, vec![20.0, 21.0, 22.0]);
        source.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_errors() {
        let (listener, mut source) = listener().await;
        let server = tokio::spawn(serve(listener, 1, vec![]));
        source.open().await.unwrap();
        assert!(source.resolve(1, "SomethingElse").await.is_err());
        source.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn requests_need_connection() {
        let (_listener, mut source) = listener().await;
        assert!(source.read_values(&node()).await.is_err());
        // Closing an unopened source is fine
        assert!(source.close().await.is_ok());
    }

    #[tokio::test]
    async fn closed_connection() {
        let (listener, mut source) = listener().await;
        let server = tokio::spawn(async move {
            // Accept, then hang up immediately.
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        source.open().await.unwrap();
        server.await.unwrap();
        assert!(source.read_values(&node()).await.is_err());
        // The connection is forgotten after being closed by the other end.
        assert!(source.stream.is_none());
    }

    #[test]
    fn reply_limit_fits_a_frame() {
        let geometry = SensorGeometry::default();
        let values: Vec<f64> = (0..geometry.sample_count())
            .map(|n| -273.15 + n as f64 / 7.0)
            .collect();
        let reply = serde_json::to_vec(&json!({ "values": values })).unwrap();
        assert!(reply.len() < max_reply_len(geometry));
        let bigger = SensorGeometry {
            rows: 48,
            columns: 64,
        };
        assert!(max_reply_len(bigger) > max_reply_len(geometry));
    }

    #[tokio::test]
    async fn oversized_reply() {
        let (listener, mut source) = listener().await;
        let limit = max_reply_len(SensorGeometry::default());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            lines.next_line().await.unwrap();
            let mut reply = b"{\"values\": [1".to_vec();
            reply.resize(reply.len() + limit * 4, b' ');
            reply.extend_from_slice(b"]}\n");
            // The client hangs up part way through, so this may fail.
            let _ = writer.write_all(&reply).await;
        });
        source.open().await.unwrap();
        let err = source.read_values(&node()).await.unwrap_err();
        assert!(err.to_string().contains("longer than"), "{}", err);
        assert!(source.stream.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn truncated_reply() {
        let (listener, mut source) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            lines.next_line().await.unwrap();
            writer.write_all(b"{\"values\": [1, 2").await.unwrap();
        });
        source.open().await.unwrap();
        let err = source.read_values(&node()).await.unwrap_err();
        assert!(err.to_string().contains("middle of a reply"), "{}", err);
        assert!(source.stream.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn link_over_tcp() {
        let (listener, source) = listener().await;
        let server = tokio::spawn(serve(listener, 1, vec![25.0; 768]));
        let mut link = SensorLink::new(Box::new(source), LinkSettings::default());
        link.connect().await.unwrap();
        // The server lists the namespace at index 1, so the fallback isn't used.
        assert_eq!(link.node().unwrap().namespace, 1);
        assert_eq!(link.read().await.unwrap().len(), 768);
        assert!(link.shutdown().await);
        server.await.unwrap();
    }
}
