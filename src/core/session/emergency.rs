//! Emergency stop.
//!
//! The stop frame skips the command pipeline and the pending-request map: it
//! goes straight to the front of the target session's write queue, and the
//! caller only waits for the transport to accept it. A session that is not
//! connected refuses immediately. Nothing here retries.

use super::session::Session;
use crate::core::communication::codec;
use crate::domain::error::EmergencyStopError;
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, warn};

pub const METHOD_EMERGENCY_STOP: &str = "printer.emergency_stop";

/// Diagnostics for a stop that reached the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyStopRecord {
    pub printer: String,
    pub request_id: u64,
    pub submitted_at: SystemTime,
    /// Time from submission until the transport accepted the frame
    pub write_latency: Duration,
}

/// Send an emergency stop to `target` ahead of any queued traffic
pub async fn emergency_stop(target: &Session) -> Result<EmergencyStopRecord, EmergencyStopError> {
    let printer = target.name().to_string();
    if !target.state().is_connected() {
        warn!("Emergency stop refused: printer '{}' is {}", printer, target.state());
        return Err(EmergencyStopError::NotConnected(printer));
    }

    let request_id = target.allocate_untracked_id();
    let text = codec::encode(METHOD_EMERGENCY_STOP, &json!({}), request_id);
    let submitted_at = SystemTime::now();
    let started = Instant::now();

    error!("EMERGENCY STOP sent to printer '{}'", printer);
    let ack = target
        .submit_priority(text)
        .map_err(|_| EmergencyStopError::NotConnected(printer.clone()))?;

    match ack.await {
        Ok(Ok(())) => {
            let record = EmergencyStopRecord {
                printer,
                request_id,
                submitted_at,
                write_latency: started.elapsed(),
            };
            target.record_emergency_stop(record.clone());
            Ok(record)
        }
        Ok(Err(e)) => Err(EmergencyStopError::WriteFailed {
            printer,
            message: e.to_string(),
        }),
        Err(_) => Err(EmergencyStopError::WriteFailed {
            printer,
            message: "link closed before the stop was written".to_string(),
        }),
    }
}

impl Session {
    /// See [`emergency_stop`]
    pub async fn emergency_stop(&self) -> Result<EmergencyStopRecord, EmergencyStopError> {
        emergency_stop(self).await
    }
}
