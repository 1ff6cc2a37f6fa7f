use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Connection lifecycle of one session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or the first dial failed
    Disconnected,
    /// First dial and handshake in progress
    Connecting,
    /// Link up and handshake finished
    Connected,
    /// Link lost; retrying with backoff
    Reconnecting { attempt: u32 },
    /// Operator disconnected; terminal
    Closed,
}

/// Inputs that drive [`ConnectionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A dial (first or retry) is starting
    Dial,
    /// Transport and handshake completed
    Established,
    /// A dial or handshake failed
    DialFailed,
    /// An established link failed or was closed by the controller
    Lost,
    /// The operator asked for the session to close
    OperatorClosed,
}

impl ConnectionState {
    /// Pure transition function; events that make no sense in the current
    /// state leave it unchanged.
    pub fn next(self, event: LinkEvent) -> ConnectionState {
        use ConnectionState::*;
        match (self, event) {
            (Closed, _) => Closed,
            (_, LinkEvent::OperatorClosed) => Closed,
            (Disconnected, LinkEvent::Dial) => Connecting,
            (Connecting, LinkEvent::Established) => Connected,
            (Connecting, LinkEvent::DialFailed) => Disconnected,
            (Connected, LinkEvent::Lost) => Reconnecting { attempt: 1 },
            (Reconnecting { .. }, LinkEvent::Established) => Connected,
            (Reconnecting { attempt }, LinkEvent::DialFailed) => Reconnecting {
                attempt: attempt.saturating_add(1),
            },
            (state, _) => state,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (#{})", attempt),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Klippy host state as reported by Moonraker notifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KlippyState {
    Ready,
    Shutdown,
    Disconnected,
}

impl KlippyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlippyState::Ready => "ready",
            KlippyState::Shutdown => "shutdown",
            KlippyState::Disconnected => "disconnected",
        }
    }
}

/// Unsolicited events a session publishes besides store updates
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A line of firmware console output
    GcodeResponse(String),
    /// A job was added, finished or removed on the controller
    JobChanged { action: String, job_id: Option<String> },
    Klippy(KlippyState),
    /// A new link finished its handshake; cached remote data may be stale
    Resubscribed,
}

/// Counters kept per session for diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    /// Requests written to the transport
    pub requests_sent: u64,
    /// Responses matched to a pending request
    pub responses_matched: u64,
    /// Responses with no pending request (late or foreign)
    pub responses_untracked: u64,
    /// Requests that ended in a timeout
    pub timeouts: u64,
    /// Notifications delivered
    pub notifications: u64,
    /// Frames that could not be decoded
    pub malformed_frames: u64,
    /// Successful reconnects
    pub reconnects: u64,
    /// Round trip of the last matched response
    pub last_round_trip: Option<Duration>,
    /// Last time a frame arrived
    pub last_activity: Option<SystemTime>,
}
