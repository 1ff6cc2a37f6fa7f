//! Routing of controller notifications.
//!
//! Status updates go to the printer state store; everything the console
//! shows to the operator becomes a [`SessionEvent`].

use super::state::{KlippyState, SessionEvent};
use crate::core::printer::PrinterStateStore;
use serde_json::{json, Value};
use tracing::trace;

pub const STATUS_UPDATE: &str = "notify_status_update";
pub const GCODE_RESPONSE: &str = "notify_gcode_response";
pub const HISTORY_CHANGED: &str = "notify_history_changed";
pub const KLIPPY_READY: &str = "notify_klippy_ready";
pub const KLIPPY_SHUTDOWN: &str = "notify_klippy_shutdown";
pub const KLIPPY_DISCONNECTED: &str = "notify_klippy_disconnected";

/// Object the klippy state is recorded under
pub const WEBHOOKS: &str = "webhooks";

/// Apply one notification.
///
/// Returns the event to publish, if the notification is something the
/// operator should see.
pub fn apply_notification(store: &PrinterStateStore, method: &str, params: &Value) -> Option<SessionEvent> {
    match method {
        STATUS_UPDATE => {
            let status = params.get(0)?.as_object()?;
            let eventtime = params
                .get(1)
                .and_then(Value::as_f64)
                .or_else(|| store.latest_timestamp())
                .unwrap_or_default();
            for (name, patch) in status {
                store.update(name, patch.clone(), eventtime);
            }
            None
        }
        GCODE_RESPONSE => {
            let line = params.get(0)?.as_str()?;
            Some(SessionEvent::GcodeResponse(line.to_string()))
        }
        HISTORY_CHANGED => {
            let change = params.get(0)?;
            let action = change
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("changed")
                .to_string();
            let job_id = change
                .get("job")
                .and_then(|job| job.get("job_id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(SessionEvent::JobChanged { action, job_id })
        }
        KLIPPY_READY => Some(klippy(store, KlippyState::Ready)),
        KLIPPY_SHUTDOWN => Some(klippy(store, KlippyState::Shutdown)),
        KLIPPY_DISCONNECTED => Some(klippy(store, KlippyState::Disconnected)),
        other => {
            trace!("Ignoring notification {}", other);
            None
        }
    }
}

fn klippy(store: &PrinterStateStore, state: KlippyState) -> SessionEvent {
    let timestamp = store.latest_timestamp().unwrap_or_default();
    store.update(WEBHOOKS, json!({ "state": state.as_str() }), timestamp);
    SessionEvent::Klippy(state)
}
