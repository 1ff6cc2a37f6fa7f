// Session module - Connection lifecycle, request correlation and reconnects
pub mod emergency;
mod link;
pub mod manager;
pub mod notify;
pub mod pending;
pub mod reconnect;
pub mod session;
pub mod state;

pub use emergency::{emergency_stop, EmergencyStopRecord};
pub use manager::{SessionManager, SessionSummary};
pub use reconnect::{Backoff, Clock, RecordingClock, TokioClock};
pub use session::{Capabilities, Session, SessionOptions};
pub use state::{ConnectionState, KlippyState, SessionEvent, SessionStatistics};
