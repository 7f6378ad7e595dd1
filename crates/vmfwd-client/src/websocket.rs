//! WebSocket stream provider for the `portforward` subresource.
//!
//! Every [`open_stream`](StreamProvider::open_stream) call dials
//!
//! `ws(s)://<server>/apis/subresources.kubevirt.io/v1/namespaces/<ns>/<plural>/<name>/portforward/<port>/<proto>`
//!
//! with the `plain.kubevirt.io` subprotocol. Binary frames carry raw payload
//! bytes in both directions, with no framing of our own. The socket is
//! bridged to the caller through an in-memory duplex pipe pumped by one task.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use vmfwd_core::{BoxFuture, BoxedStream, StreamProvider, StreamRequest, TunnelError, TunnelResult};

/// WebSocket subprotocol spoken by the subresource: raw bytes, no framing.
pub const SUBPROTOCOL: &str = "plain.kubevirt.io";

const API_PREFIX: &str = "apis/subresources.kubevirt.io/v1";

/// Capacity of the pipe between the caller and the pump task.
const PIPE_CAPACITY: usize = 64 * 1024;

const READ_CHUNK: usize = 32 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `portforward` streams on a KubeVirt API server.
#[derive(Debug, Clone)]
pub struct KubevirtStreamProvider {
    /// `ws://host[:port][/prefix]` or `wss://...`, without trailing slash.
    base_url: String,
}

impl KubevirtStreamProvider {
    /// `server` is the API server base URL. `http`/`https` map to `ws`/`wss`.
    pub fn new(server: &str) -> TunnelResult<Self> {
        let server = server.trim().trim_end_matches('/');
        let (scheme, rest) = server
            .split_once("://")
            .ok_or_else(|| TunnelError::Transport(format!("server url '{server}' has no scheme")))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TunnelError::Transport(format!(
                    "unsupported server url scheme '{other}'"
                )))
            }
        };
        if rest.is_empty() {
            return Err(TunnelError::Transport(format!("server url '{server}' has no host")));
        }
        if scheme == "wss" {
            // Another component may have installed a provider already.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        Ok(Self {
            base_url: format!("{scheme}://{rest}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full WebSocket URL for one stream.
    pub fn stream_url(&self, request: &StreamRequest) -> String {
        let target = &request.target;
        format!(
            "{}/{}/namespaces/{}/{}/{}/{}",
            self.base_url,
            API_PREFIX,
            target.namespace,
            target.kind.plural(),
            target.name,
            request.resource_path()
        )
    }

    async fn dial(&self, request: &StreamRequest) -> TunnelResult<BoxedStream> {
        let url = self.stream_url(request);
        let open_error = |reason: String| TunnelError::StreamOpen {
            request: request.to_string(),
            reason,
        };

        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| open_error(e.to_string()))?;
        ws_request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (ws, _response) = connect_async(ws_request)
            .await
            .map_err(|e| open_error(e.to_string()))?;
        info!(url = %url, "portforward stream connected");

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        tokio::spawn(pump(ws, far, request.to_string()));
        Ok(Box::new(near))
    }
}

impl StreamProvider for KubevirtStreamProvider {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>> {
        Box::pin(self.dial(request))
    }
}

/// Move bytes between the WebSocket and the pipe until either side closes.
async fn pump(ws: WsStream, pipe: DuplexStream, label: String) {
    let (mut sink, mut frames) = ws.split();
    let (mut pipe_read, mut pipe_write) = tokio::io::split(pipe);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = pipe_read.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => {
                        let _ = sink.send(Message::Close(None)).await;
                        debug!(stream = %label, "local side closed, closing websocket");
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = sink.send(Message::Binary(buf[..n].to_vec())).await {
                            debug!(stream = %label, error = %e, "websocket send failed");
                            break;
                        }
                    }
                }
            }
            frame = frames.next() => {
                let payload = match frame {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(stream = %label, "websocket closed by server");
                        break;
                    }
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(stream = %label, error = %e, "websocket read failed");
                        break;
                    }
                };
                if pipe_write.write_all(&payload).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use vmfwd_core::{ForwardTarget, Protocol, ResourceKind};

    fn request(kind: ResourceKind, port: u16, protocol: Protocol) -> StreamRequest {
        StreamRequest::new(Arc::new(ForwardTarget::new(kind, "ns1", "testvm")), port, protocol)
    }

    #[test]
    fn http_schemes_map_to_websocket() {
        let p = KubevirtStreamProvider::new("https://api.cluster:6443/").unwrap();
        assert_eq!(p.base_url(), "wss://api.cluster:6443");
        let p = KubevirtStreamProvider::new("http://127.0.0.1:8001").unwrap();
        assert_eq!(p.base_url(), "ws://127.0.0.1:8001");
        let p = KubevirtStreamProvider::new("ws://proxy/k8s").unwrap();
        assert_eq!(p.base_url(), "ws://proxy/k8s");
    }

    #[test]
    fn rejects_other_schemes() {
        for bad in ["ftp://host", "host:6443", "https://"] {
            let err = KubevirtStreamProvider::new(bad).unwrap_err();
            assert!(matches!(err, TunnelError::Transport(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn builds_subresource_urls() {
        let p = KubevirtStreamProvider::new("http://localhost:8001").unwrap();
        assert_eq!(
            p.stream_url(&request(ResourceKind::Vmi, 22, Protocol::Tcp)),
            "ws://localhost:8001/apis/subresources.kubevirt.io/v1/namespaces/ns1/virtualmachineinstances/testvm/portforward/22/tcp"
        );
        assert_eq!(
            p.stream_url(&request(ResourceKind::Vm, 53, Protocol::Udp)),
            "ws://localhost:8001/apis/subresources.kubevirt.io/v1/namespaces/ns1/virtualmachines/testvm/portforward/53/udp"
        );
    }

    /// Accept one WebSocket, record its path and subprotocol, echo binary frames.
    async fn echo_server() -> (String, Arc<Mutex<Option<(String, String)>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let record = seen.clone();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                let proto = req
                    .headers()
                    .get(SEC_WEBSOCKET_PROTOCOL)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                *record.lock().unwrap() = Some((req.uri().path().to_string(), proto));
                resp.headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(data) => ws.send(Message::Binary(data)).await.unwrap(),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn relays_bytes_over_websocket() {
        let (server, seen) = echo_server().await;
        let provider = KubevirtStreamProvider::new(&server).unwrap();
        let req = request(ResourceKind::Vmi, 22, Protocol::Tcp);

        let mut stream = timeout(Duration::from_secs(5), provider.open_stream(&req))
            .await
            .unwrap()
            .unwrap();
        stream.write_all(b"ssh-hello").await.unwrap();
        let mut buf = [0u8; 9];
        timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"ssh-hello");

        let (path, proto) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            path,
            "/apis/subresources.kubevirt.io/v1/namespaces/ns1/virtualmachineinstances/testvm/portforward/22/tcp"
        );
        assert_eq!(proto, SUBPROTOCOL);
    }

    #[tokio::test]
    async fn connect_failure_is_stream_open_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = KubevirtStreamProvider::new(&format!("http://{addr}")).unwrap();
        let req = request(ResourceKind::Vmi, 22, Protocol::Tcp);
        let err = provider.open_stream(&req).await.err().unwrap();
        assert!(matches!(err, TunnelError::StreamOpen { .. }), "{err}");
    }
}
