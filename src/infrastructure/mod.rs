// Infrastructure module - External dependencies and adapters
pub mod config;
pub mod history_store;
pub mod logging;
pub mod websocket;
