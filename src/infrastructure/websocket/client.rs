use crate::core::communication::transport::{Connector, FrameSink, FrameSource, Link};
use crate::domain::error::{ConnectError, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Header Moonraker reads API keys from
const API_KEY_HEADER: &str = "X-Api-Key";

/// Opens WebSocket links to Moonraker instances
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self, endpoint: &Url, api_key: Option<&str>) -> Result<Link, ConnectError> {
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }

        let uri: tungstenite::http::Uri =
            endpoint
                .as_str()
                .parse()
                .map_err(|e: tungstenite::http::uri::InvalidUri| ConnectError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(key) = api_key {
            request = request.with_header(API_KEY_HEADER, key);
        }

        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => ConnectError::Handshake {
                    endpoint: endpoint.to_string(),
                    message: format!("HTTP {}", response.status()),
                },
                other => ConnectError::Transport(other.to_string()),
            })?;
        info!("WebSocket connected to {} (HTTP {})", endpoint, response.status());

        let (sink, source) = stream.split();
        Ok(Link::new(
            WebSocketSink { inner: sink },
            WebSocketSource { inner: source },
        ))
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(transport_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await.map_err(transport_error)
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|e| TransportError::Io(e.to_string())))
                }
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => info!("WebSocket closed by peer: {} {}", frame.code, frame.reason),
                        None => info!("WebSocket closed by peer"),
                    }
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => trace!("WebSocket ping/pong"),
                Ok(Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) => {
                    debug!("WebSocket stream ended");
                    return None;
                }
                Err(e) => return Some(Err(transport_error(e))),
            }
        }
    }
}

fn transport_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    /// Accept one connection, report its API key header and echo text frames
    async fn echo_server() -> (Url, tokio::task::JoinHandle<Option<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut api_key = None;
            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                api_key = request
                    .headers()
                    .get(API_KEY_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() {
                    ws.send(message).await.unwrap();
                } else if message.is_close() {
                    break;
                }
            }
            api_key
        });
        let url = Url::parse(&format!("ws://{}/websocket", address)).unwrap();
        (url, handle)
    }

    #[tokio::test]
    async fn test_round_trip_with_api_key() {
        let (url, server) = echo_server().await;
        let mut link = WebSocketConnector.connect(&url, Some("secret")).await.unwrap();

        link.sink.send_text(r#"{"jsonrpc":"2.0"}"#.to_string()).await.unwrap();
        let echoed = link.source.next_text().await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"jsonrpc":"2.0"}"#);

        link.sink.close().await.unwrap();
        assert_eq!(server.await.unwrap().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let url = Url::parse("http://localhost:7125/websocket").unwrap();
        let err = WebSocketConnector.connect(&url, None).await.err().unwrap();
        assert!(matches!(err, ConnectError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/websocket", address)).unwrap();
        let err = WebSocketConnector.connect(&url, None).await.err().unwrap();
        assert!(matches!(err, ConnectError::Transport(_)));
    }
}
