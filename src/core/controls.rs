//! Printer controls.
//!
//! Heater targets, fan speeds and moves are plain G-code sent through
//! `printer.gcode.script`. Starting a print and switching power devices go
//! through their own Moonraker methods.

use crate::core::session::Session;
use crate::domain::error::{PipelineError, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::info;

pub const METHOD_PRINT_START: &str = "printer.print.start";
pub const METHOD_POWER_DEVICES: &str = "machine.device_power.devices";
pub const METHOD_POWER_POST: &str = "machine.device_power.post_device";

/// Highest heater target accepted, in °C
pub const MAX_TEMPERATURE: f64 = 300.0;
/// Highest absolute axis position accepted, in mm
pub const MAX_TRAVEL: f64 = 400.0;
const MOVE_FEEDRATE: u32 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heater {
    Extruder,
    Bed,
    /// Any other heater object, e.g. `extruder1`
    Named(String),
}

impl Heater {
    fn from_word(word: &str) -> Self {
        match word {
            "extruder" | "e" => Heater::Extruder,
            "bed" | "heater_bed" => Heater::Bed,
            other => Heater::Named(other.to_string()),
        }
    }
}

impl fmt::Display for Heater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Heater::Extruder => write!(f, "Extruder"),
            Heater::Bed => write!(f, "Bed"),
            Heater::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fan {
    /// The part cooling fan, driven with M106
    Part,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

/// A control that is carried out as a single G-code command
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Heater { heater: Heater, target: f64 },
    /// `percent` is 0 to 100
    Fan { fan: Fan, percent: f64 },
    /// Absolute move of one axis
    Move { axis: Axis, position: f64 },
}

impl Control {
    pub fn heater(name: &str, target: &str) -> Result<Self, PipelineError> {
        let target = ranged(target, MAX_TEMPERATURE, "temperature")?;
        Ok(Control::Heater {
            heater: Heater::from_word(name),
            target,
        })
    }

    pub fn fan(name: &str, percent: &str) -> Result<Self, PipelineError> {
        let percent = ranged(percent, 100.0, "fan speed")?;
        let fan = match name {
            "part" | "fan" => Fan::Part,
            other => Fan::Named(other.to_string()),
        };
        Ok(Control::Fan { fan, percent })
    }

    pub fn move_axis(axis: &str, position: &str) -> Result<Self, PipelineError> {
        let axis = match axis.to_ascii_lowercase().as_str() {
            "x" => Axis::X,
            "y" => Axis::Y,
            "z" => Axis::Z,
            _ => return Err(PipelineError::InvalidArguments(format!("unknown axis '{}'", axis))),
        };
        let position = ranged(position, MAX_TRAVEL, "position")?;
        Ok(Control::Move { axis, position })
    }

    pub fn gcode(&self) -> String {
        match self {
            Control::Heater {
                heater: Heater::Extruder,
                target,
            } => format!("M104 S{}", target.round() as u32),
            Control::Heater {
                heater: Heater::Bed,
                target,
            } => format!("M140 S{}", target.round() as u32),
            Control::Heater {
                heater: Heater::Named(name),
                target,
            } => format!("SET_HEATER_TEMPERATURE HEATER={} TARGET={}", name, target.round() as u32),
            Control::Fan { fan: Fan::Part, percent } => {
                format!("M106 S{}", (percent / 100.0 * 255.0).round() as u8)
            }
            Control::Fan {
                fan: Fan::Named(name),
                percent,
            } => format!("SET_FAN_SPEED FAN={} SPEED={:.2}", name, percent / 100.0),
            Control::Move { axis, position } => {
                format!("G0 {}{:.2} F{}", axis.letter(), position, MOVE_FEEDRATE)
            }
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Heater { heater, target } => {
                write!(f, "{} target set to {}°C", heater, target.round() as u32)
            }
            Control::Fan { fan: Fan::Part, percent } => write!(f, "Part fan set to {}%", percent.round() as u32),
            Control::Fan {
                fan: Fan::Named(name),
                percent,
            } => write!(f, "Fan {} set to {}%", name, percent.round() as u32),
            Control::Move { axis, position } => write!(f, "Moving {} to {:.2}mm", axis.letter(), position),
        }
    }
}

/// A number in `0..=max`
fn ranged(text: &str, max: f64, what: &str) -> Result<f64, PipelineError> {
    match text.parse::<f64>() {
        Ok(value) if (0.0..=max).contains(&value) => Ok(value),
        _ => Err(PipelineError::InvalidArguments(format!(
            "{} must be a number from 0 to {}, got '{}'",
            what, max, text
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
    Toggle,
}

impl PowerAction {
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "on" => Some(PowerAction::On),
            "off" => Some(PowerAction::Off),
            "toggle" => Some(PowerAction::Toggle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
            PowerAction::Toggle => "toggle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerCommand {
    List,
    Set { device: String, action: PowerAction },
}

/// A Moonraker power device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDevice {
    pub device: String,
    /// on, off, init, error
    pub status: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub locked_while_printing: bool,
}

pub async fn power_devices(session: &Session) -> Result<Vec<PowerDevice>, RpcError> {
    let result = session
        .send(METHOD_POWER_DEVICES, json!({}), session.request_timeout())
        .await?;
    match result.get("devices") {
        Some(devices) => serde_json::from_value(devices.clone())
            .map_err(|e| RpcError::ProtocolMalformed(format!("power devices: {}", e))),
        None => Err(RpcError::ProtocolMalformed("power device list without devices".to_string())),
    }
}

/// Switch `device`, returning its new status.
///
/// Devices locked while printing are refused while the printer reports a
/// running print.
pub async fn set_power(session: &Session, device: &str, action: PowerAction) -> Result<String, PipelineError> {
    let devices = power_devices(session).await?;
    let known = devices
        .iter()
        .find(|d| d.device == device)
        .ok_or_else(|| PipelineError::InvalidArguments(format!("unknown power device '{}'", device)))?;
    if known.locked_while_printing && is_printing(session) {
        return Err(PipelineError::Refused(format!(
            "'{}' is locked while printing",
            device
        )));
    }

    let result = session
        .send(
            METHOD_POWER_POST,
            json!({ "device": device, "action": action.as_str() }),
            session.request_timeout(),
        )
        .await?;
    let status = result
        .get(device)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::ProtocolMalformed(format!("no status for power device '{}'", device)))?;
    info!("Session '{}' power device '{}' is now {}", session.name(), device, status);
    Ok(status.to_string())
}

pub async fn start_print(session: &Session, filename: &str) -> Result<(), RpcError> {
    session
        .send(METHOD_PRINT_START, json!({ "filename": filename }), session.request_timeout())
        .await?;
    info!("Session '{}' started printing '{}'", session.name(), filename);
    Ok(())
}

fn is_printing(session: &Session) -> bool {
    session
        .store()
        .read("print_stats")
        .and_then(|stats| stats.get("state").and_then(Value::as_str).map(|s| s == "printing"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::transport::memory::{klipper_reply, MemoryConnector, Reply};
    use crate::core::session::SessionOptions;
    use crate::domain::config::ReconnectConfig;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn options() -> SessionOptions {
        SessionOptions {
            name: "voron".to_string(),
            endpoint: url::Url::parse("memory://voron").unwrap(),
            api_key: None,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            notification_buffer: 16,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// A session whose controller reports `print_state` and records power posts
    async fn session(print_state: &'static str) -> (Session, Arc<Mutex<Vec<Value>>>) {
        let (connector, peers) = MemoryConnector::new();
        let posts = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&posts);
        peers.serve(move |request| match request.method.as_str() {
            "printer.objects.subscribe" => Reply::Result(json!({
                "eventtime": 100.0,
                "status": {"print_stats": {"state": print_state, "filename": "benchy.gcode"}}
            })),
            METHOD_POWER_POST => {
                log.lock().unwrap().push(request.params.clone());
                klipper_reply(request)
            }
            _ => klipper_reply(request),
        });
        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.store().read("print_stats").is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        (session, posts)
    }

    #[test]
    fn test_heater_gcode() {
        assert_eq!(Control::heater("extruder", "210").unwrap().gcode(), "M104 S210");
        assert_eq!(Control::heater("bed", "60.4").unwrap().gcode(), "M140 S60");
        assert_eq!(
            Control::heater("extruder1", "0").unwrap().gcode(),
            "SET_HEATER_TEMPERATURE HEATER=extruder1 TARGET=0"
        );
        assert_eq!(
            Control::heater("e", "215").unwrap().to_string(),
            "Extruder target set to 215°C"
        );
    }

    #[test]
    fn test_fan_gcode() {
        assert_eq!(Control::fan("part", "100").unwrap().gcode(), "M106 S255");
        assert_eq!(Control::fan("fan", "50").unwrap().gcode(), "M106 S128");
        assert_eq!(
            Control::fan("exhaust", "35").unwrap().gcode(),
            "SET_FAN_SPEED FAN=exhaust SPEED=0.35"
        );
    }

    #[test]
    fn test_move_gcode() {
        assert_eq!(Control::move_axis("x", "120").unwrap().gcode(), "G0 X120.00 F3000");
        assert_eq!(Control::move_axis("Z", "0.2").unwrap().gcode(), "G0 Z0.20 F3000");
        assert!(Control::move_axis("e", "10").is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(matches!(
            Control::heater("extruder", "301"),
            Err(PipelineError::InvalidArguments(_))
        ));
        assert!(Control::heater("bed", "-1").is_err());
        assert!(Control::heater("bed", "NaN").is_err());
        assert!(Control::fan("part", "101").is_err());
        assert!(Control::move_axis("y", "400.5").is_err());
        assert!(Control::move_axis("y", "abc").is_err());
    }

    #[tokio::test]
    async fn test_power_devices_listed() {
        let (session, _) = session("standby").await;
        let devices = power_devices(&session).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device, "printer");
        assert_eq!(devices[0].kind, "gpio");
        assert!(devices[0].locked_while_printing);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_set_power_reports_new_status() {
        let (session, posts) = session("standby").await;
        let status = set_power(&session, "lights", PowerAction::Toggle).await.unwrap();
        assert_eq!(status, "on");
        assert_eq!(
            posts.lock().unwrap().as_slice(),
            &[json!({"device": "lights", "action": "toggle"})]
        );
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_locked_device_refused_while_printing() {
        let (session, posts) = session("printing").await;
        let err = set_power(&session, "printer", PowerAction::Off).await.unwrap_err();
        assert!(matches!(err, PipelineError::Refused(_)));

        // Unlocked devices still switch
        assert_eq!(set_power(&session, "lights", PowerAction::On).await.unwrap(), "on");
        assert_eq!(posts.lock().unwrap().len(), 1);

        let err = set_power(&session, "heater", PowerAction::On).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArguments(_)));
        session.disconnect().await;
    }
}
