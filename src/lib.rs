//! Moonriver Library
//!
//! Terminal console for Klipper printers. Talks JSON-RPC 2.0 to Moonraker
//! over WebSockets, keeps one session per printer with automatic
//! reconnection, and runs operator commands in order with an emergency stop
//! that bypasses everything queued.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod tui;

pub use core::console::Console;
pub use core::pipeline::CommandPipeline;
pub use core::session::{Session, SessionManager};
pub use domain::config::MoonriverConfig;
pub use domain::error::{MoonriverError, MoonriverResult};
