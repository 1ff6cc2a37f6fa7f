// WebSocket module - Moonraker transport over tokio-tungstenite
pub mod client;

pub use client::WebSocketConnector;
