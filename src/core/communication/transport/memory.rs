//! In-process transport.
//!
//! [`MemoryConnector`] opens links backed by channels and hands the controller
//! end of each one to [`MemoryPeers`], so tests and demos can play the part of
//! a Moonraker instance without a socket.

use super::{Connector, FrameSink, FrameSource, Link};
use crate::core::communication::codec::RequestId;
use crate::domain::error::{ConnectError, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Connector whose links terminate in the same process
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Controller side: yields one [`MemoryPeer`] per opened link
pub struct MemoryPeers {
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Controller end of one link
pub struct MemoryPeer {
    endpoint: Url,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

/// A request frame as seen by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

/// How a scripted controller answers a request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    /// Leave the request unanswered
    Ignore,
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryPeers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryPeers { rx })
    }

    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, endpoint: &Url, _api_key: Option<&str>) -> Result<Link, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::Transport(format!(
                "connection to {} refused",
                endpoint
            )));
        }

        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_console_tx, to_console_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            inbound: to_peer_rx,
            outbound: Some(to_console_tx),
        };
        self.peers
            .send(peer)
            .map_err(|_| ConnectError::Transport(format!("no controller at {}", endpoint)))?;

        Ok(Link::new(
            MemorySink {
                tx: Some(to_peer_tx),
            },
            MemorySource { rx: to_console_rx },
        ))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

impl MemoryPeers {
    /// Wait for the console to open the next link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.rx.recv().await
    }

    /// Answer every link, present and future, with `handler`
    pub fn serve<F>(mut self, handler: F) -> JoinHandle<()>
    where
        F: Fn(&PeerRequest) -> Reply + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Some(peer) = self.accept().await {
                let handler = Arc::clone(&handler);
                peer.spawn_responder(move |request| handler(request));
            }
        })
    }
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Next raw frame written by the console; `None` once the console closed
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next request written by the console, skipping anything unparseable
    pub async fn recv_request(&mut self) -> Option<PeerRequest> {
        loop {
            let text = self.recv_frame().await?;
            if let Some(request) = PeerRequest::parse(&text) {
                return Some(request);
            }
        }
    }

    /// Push raw text to the console
    pub fn send_frame(&self, text: impl Into<String>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn respond(&self, id: RequestId, result: Value) -> bool {
        self.send_frame(json!({"jsonrpc": "2.0", "result": result, "id": id}).to_string())
    }

    pub fn respond_error(&self, id: RequestId, code: i64, message: &str) -> bool {
        self.send_frame(
            json!({
                "jsonrpc": "2.0",
                "error": {"code": code, "message": message},
                "id": id,
            })
            .to_string(),
        )
    }

    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.send_frame(json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string())
    }

    pub fn reply(&self, id: RequestId, reply: Reply) -> bool {
        match reply {
            Reply::Result(value) => self.respond(id, value),
            Reply::Error { code, message } => self.respond_error(id, code, &message),
            Reply::Ignore => true,
        }
    }

    /// Simulate the controller dropping the connection
    pub fn close(&mut self) {
        self.outbound = None;
    }

    /// Answer requests on this link with `handler` until the console closes it
    pub fn spawn_responder<F>(mut self, handler: F) -> JoinHandle<()>
    where
        F: Fn(&PeerRequest) -> Reply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.recv_request().await {
                let reply = handler(&request);
                self.reply(request.id, reply);
            }
        })
    }

    /// Answer the connect handshake with [`klipper_reply`]
    pub async fn complete_handshake(&mut self) -> Option<()> {
        for _ in 0..3 {
            let request = self.recv_request().await?;
            let reply = klipper_reply(&request);
            self.reply(request.id, reply);
        }
        Some(())
    }
}

impl PeerRequest {
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Some(Self {
            id: value.get("id")?.as_u64()?,
            method: value.get("method")?.as_str()?.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Objects reported by [`klipper_reply`] for `printer.objects.list`
pub const SAMPLE_OBJECTS: &[&str] = &[
    "configfile",
    "extruder",
    "fan",
    "gcode_move",
    "heater_bed",
    "print_stats",
    "temperature_sensor chamber",
    "toolhead",
    "webhooks",
];

/// Canned answers of an idle Klipper host
pub fn klipper_reply(request: &PeerRequest) -> Reply {
    match request.method.as_str() {
        "printer.objects.list" => Reply::Result(json!({ "objects": SAMPLE_OBJECTS })),
        "printer.objects.subscribe" => Reply::Result(json!({
            "eventtime": 100.0,
            "status": {
                "extruder": {"temperature": 24.5, "target": 0.0, "power": 0.0},
                "heater_bed": {"temperature": 23.9, "target": 0.0, "power": 0.0},
                "toolhead": {"position": [0.0, 0.0, 0.0, 0.0], "homed_axes": ""},
                "print_stats": {"state": "standby", "filename": ""},
                "temperature_sensor chamber": {"temperature": 27.0},
            }
        })),
        "printer.gcode.help" => Reply::Result(json!({
            "BED_MESH_CALIBRATE": "Perform Mesh Bed Leveling",
            "CLEAN_NOZZLE": "G-Code macro",
            "G28": "Home axes",
            "PRINT_START": "G-Code macro",
        })),
        "printer.gcode.script" | "printer.emergency_stop" => Reply::Result(json!("ok")),
        "server.history.list" => Reply::Result(json!({"count": 0, "jobs": []})),
        "printer.print.start" => Reply::Result(json!("ok")),
        "machine.device_power.devices" => Reply::Result(json!({
            "devices": [
                {"device": "printer", "status": "on", "locked_while_printing": true, "type": "gpio"},
                {"device": "lights", "status": "off", "locked_while_printing": false, "type": "klipper_device"},
            ]
        })),
        "machine.device_power.post_device" => {
            let device = request.params["device"].as_str().unwrap_or_default();
            let status = match request.params["action"].as_str() {
                Some("off") => "off",
                _ => "on",
            };
            let mut result = serde_json::Map::new();
            result.insert(device.to_string(), json!(status));
            Reply::Result(Value::Object(result))
        }
        _ => Reply::Error {
            code: -32601,
            message: format!("Method not found: {}", request.method),
        },
    }
}
