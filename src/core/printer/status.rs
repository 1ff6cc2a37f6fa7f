//! Typed projections of the printer state for the status bars.
//!
//! Every view is optional: an object the controller never reported (or that
//! could not be subscribed) renders as "unavailable".

use super::store::PrinterSnapshot;
use serde::Serialize;
use serde_json::Value;

/// Objects every session subscribes to
pub const BASE_OBJECTS: &[&str] = &[
    "extruder",
    "heater_bed",
    "toolhead",
    "gcode_move",
    "print_stats",
    "fan",
    "webhooks",
];

const SENSOR_PREFIXES: &[&str] = &["temperature_sensor ", "temperature_fan "];
const FAN_PREFIXES: &[&str] = &["heater_fan ", "controller_fan ", "temperature_fan "];

/// Objects to subscribe to, given what `printer.objects.list` reported
pub fn subscription_objects(available: &[String]) -> Vec<String> {
    let mut objects: Vec<String> = BASE_OBJECTS.iter().map(|s| s.to_string()).collect();
    for name in available {
        let wanted = SENSOR_PREFIXES.iter().any(|p| name.starts_with(p))
            || FAN_PREFIXES.iter().any(|p| name.starts_with(p))
            || name == "mcu"
            || name == "temperature_host";
        if wanted && !objects.contains(name) {
            objects.push(name.clone());
        }
    }
    objects
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaterView {
    pub temperature: f64,
    pub target: f64,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorView {
    pub name: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanView {
    pub name: String,
    /// 0.0 to 1.0
    pub speed: f64,
    pub rpm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolheadView {
    /// X, Y, Z, E
    pub position: [f64; 4],
    pub homed_axes: String,
}

impl ToolheadView {
    pub fn is_homed(&self, axis: char) -> bool {
        self.homed_axes.contains(axis.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrintStatsView {
    /// standby, printing, paused, complete, cancelled, error
    pub state: String,
    pub filename: String,
    pub total_duration: f64,
    pub print_duration: f64,
    pub filament_used: f64,
}

/// Everything the status bars show for one printer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterStatus {
    pub extruder: Option<HeaterView>,
    pub bed: Option<HeaterView>,
    pub sensors: Vec<SensorView>,
    pub fans: Vec<FanView>,
    pub toolhead: Option<ToolheadView>,
    pub print_stats: Option<PrintStatsView>,
    /// Klippy host state: ready, startup, shutdown, error, disconnected
    pub klippy: Option<String>,
}

impl PrinterStatus {
    pub fn from_snapshot(snapshot: &PrinterSnapshot) -> Self {
        let mut status = PrinterStatus {
            extruder: snapshot.get("extruder").map(heater),
            bed: snapshot.get("heater_bed").map(heater),
            toolhead: snapshot.get("toolhead").map(toolhead),
            print_stats: snapshot.get("print_stats").map(print_stats),
            klippy: snapshot
                .get("webhooks")
                .and_then(|w| w.get("state"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        };

        // BTreeMap iteration keeps sensors and fans in a stable order
        for (name, entry) in &snapshot.objects {
            if let Some(sensor) = sensor(name, &entry.value) {
                status.sensors.push(sensor);
            }
            if let Some(fan) = fan(name, &entry.value) {
                status.fans.push(fan);
            }
        }

        status
    }
}

fn number(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn heater(value: &Value) -> HeaterView {
    HeaterView {
        temperature: number(value, "temperature").unwrap_or_default(),
        target: number(value, "target").unwrap_or_default(),
        power: number(value, "power").unwrap_or_default(),
    }
}

fn toolhead(value: &Value) -> ToolheadView {
    let mut view = ToolheadView::default();
    if let Some(position) = value.get("position").and_then(Value::as_array) {
        for (slot, axis) in view.position.iter_mut().zip(position) {
            *slot = axis.as_f64().unwrap_or_default();
        }
    }
    if let Some(homed) = value.get("homed_axes").and_then(Value::as_str) {
        view.homed_axes = homed.to_string();
    }
    view
}

fn print_stats(value: &Value) -> PrintStatsView {
    PrintStatsView {
        state: value
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        filename: value
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        total_duration: number(value, "total_duration").unwrap_or_default(),
        print_duration: number(value, "print_duration").unwrap_or_default(),
        filament_used: number(value, "filament_used").unwrap_or_default(),
    }
}

fn sensor(name: &str, value: &Value) -> Option<SensorView> {
    let label = if let Some(rest) = SENSOR_PREFIXES.iter().find_map(|p| name.strip_prefix(p)) {
        rest.to_string()
    } else if name == "temperature_host" {
        "host".to_string()
    } else if name == "mcu" || name.starts_with("mcu ") {
        name.to_string()
    } else {
        return None;
    };

    Some(SensorView {
        name: label,
        temperature: number(value, "temperature")?,
    })
}

fn fan(name: &str, value: &Value) -> Option<FanView> {
    let label = if name == "fan" {
        "part".to_string()
    } else {
        FAN_PREFIXES.iter().find_map(|p| name.strip_prefix(p))?.to_string()
    };

    Some(FanView {
        name: label,
        speed: number(value, "speed")?,
        rpm: number(value, "rpm"),
    })
}
