//! Static command grammar: the command names known without asking a
//! controller.

/// Console built-ins
pub const BUILTINS: &[&str] = &[
    ":connect",
    ":disconnect",
    ":estop",
    ":fan",
    ":help",
    ":history",
    ":jobs",
    ":move",
    ":power",
    ":print",
    ":printer",
    ":printers",
    ":quit",
    ":reprint",
    ":temp",
];

/// Standard G/M codes
pub const GCODES: &[&str] = &[
    "G0", "G1", "G2", "G3", "G4", "G10", "G11", "G28", "G29", "G90", "G91", "G92", "M0", "M1",
    "M17", "M18", "M20", "M21", "M22", "M23", "M24", "M25", "M26", "M27", "M28", "M29", "M30",
    "M31", "M32", "M82", "M83", "M84", "M104", "M105", "M106", "M107", "M109", "M110", "M111",
    "M112", "M114", "M115", "M117", "M118", "M119", "M120", "M121", "M140", "M141", "M190",
    "M191", "M204", "M205", "M206", "M220", "M221", "M280", "M300", "M400", "M500", "M501",
    "M502", "M503", "M600", "M900", "M997", "M999",
];

/// Klipper extended commands every host provides
pub const EXTENDED: &[&str] = &[
    "ACCEPT",
    "ABORT",
    "BED_MESH_CALIBRATE",
    "BED_MESH_CLEAR",
    "BED_MESH_PROFILE",
    "CANCEL_PRINT",
    "CLEAR_PAUSE",
    "FIRMWARE_RESTART",
    "GET_POSITION",
    "HELP",
    "PAUSE",
    "PID_CALIBRATE",
    "PROBE",
    "PROBE_CALIBRATE",
    "QUERY_ENDSTOPS",
    "QUERY_PROBE",
    "RESTART",
    "RESUME",
    "SAVE_CONFIG",
    "SAVE_GCODE_STATE",
    "RESTORE_GCODE_STATE",
    "SET_FAN_SPEED",
    "SET_GCODE_OFFSET",
    "SET_HEATER_TEMPERATURE",
    "SET_KINEMATIC_POSITION",
    "SET_PRESSURE_ADVANCE",
    "SET_VELOCITY_LIMIT",
    "STATUS",
    "TEMPERATURE_WAIT",
    "TESTZ",
    "TURN_OFF_HEATERS",
    "Z_TILT_ADJUST",
];

/// Known command names, sorted and deduplicated
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    commands: Vec<String>,
}

impl Grammar {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        commands.sort();
        commands.dedup();
        Self { commands }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands.binary_search_by(|c| c.as_str().cmp(command)).is_ok()
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new(
            BUILTINS
                .iter()
                .chain(GCODES)
                .chain(EXTENDED)
                .copied(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grammar_is_sorted() {
        let grammar = Grammar::default();
        let commands = grammar.commands();
        assert!(commands.windows(2).all(|w| w[0] < w[1]));
        assert!(grammar.contains("G28"));
        assert!(grammar.contains(":printer"));
        assert!(grammar.contains("SET_HEATER_TEMPERATURE"));
        assert!(!grammar.contains("g28"));
    }

    #[test]
    fn test_custom_grammar_dedups() {
        let grammar = Grammar::new(["HOME", "HELP", "HOME"]);
        assert_eq!(grammar.commands(), ["HELP", "HOME"]);
    }
}
