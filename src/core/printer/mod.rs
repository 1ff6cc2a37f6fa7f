// Printer module - Cached controller object state and typed views over it
pub mod status;
pub mod store;

pub use status::{subscription_objects, FanView, HeaterView, PrintStatsView, PrinterStatus, SensorView, ToolheadView};
pub use store::{ObjectEntry, PrinterSnapshot, PrinterStateStore};
