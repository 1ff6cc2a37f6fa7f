use crate::domain::error::{ConnectError, TransportError};
use async_trait::async_trait;
use url::Url;

pub mod memory;

/// Writing half of a message-oriented duplex connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection politely
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reading half of a message-oriented duplex connection
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame; `None` once the peer has closed the stream
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// An established connection, split into independent halves so one task can
/// write while another reads.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Link {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

/// Opens links to controller endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human readable transport name for logs
    fn name(&self) -> &'static str;

    /// Establish a new link to `endpoint`
    async fn connect(&self, endpoint: &Url, api_key: Option<&str>) -> Result<Link, ConnectError>;
}

/// Parse and validate a controller endpoint
pub fn parse_endpoint(endpoint: &str) -> Result<Url, ConnectError> {
    let url = Url::parse(endpoint).map_err(|e| ConnectError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" | "memory" => Ok(url),
        other => Err(ConnectError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}
