/// Console-wide selection state passed into every dispatch.
///
/// The active printer is only changed by the pipeline's built-ins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleContext {
    active: Option<String>,
}

impl ConsoleContext {
    pub fn new(active: Option<String>) -> Self {
        Self { active }
    }

    /// Printer that firmware commands are sent to
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Returns the previously active printer
    pub(super) fn switch_to(&mut self, printer: impl Into<String>) -> Option<String> {
        self.active.replace(printer.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_returns_previous() {
        let mut ctx = ConsoleContext::new(Some("voron".to_string()));
        assert_eq!(ctx.switch_to("ender"), Some("voron".to_string()));
        assert_eq!(ctx.active(), Some("ender"));
    }
}
