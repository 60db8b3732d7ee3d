//! Output sink abstraction for monitor-facing text
//!
//! Resolver error listings and the info renderers write here. A
//! non-interactive sink (a machine protocol client) suppresses the
//! human-oriented hint lines.

/// Where monitor-facing text goes
pub trait Monitor {
    /// Write raw text; callers include their own newlines
    fn print(&mut self, text: &str);

    /// Whether a human is reading; hint lines are only emitted when true
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Capturing sink, used by tests and by callers that post-process output
#[derive(Debug, Default)]
pub struct StringMonitor {
    buf: String,
    interactive: bool,
}

impl StringMonitor {
    /// Create a non-interactive capturing sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interactive capturing sink
    pub fn interactive() -> Self {
        Self {
            buf: String::new(),
            interactive: true,
        }
    }

    /// Everything written so far
    pub fn contents(&self) -> &str {
        &self.buf
    }

    /// Captured output split into lines
    pub fn lines(&self) -> Vec<&str> {
        self.buf.lines().collect()
    }

    /// Discard captured output
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Monitor for StringMonitor {
    fn print(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Pass-through sink for an interactive terminal
#[derive(Debug, Default)]
pub struct StdoutMonitor;

impl Monitor for StdoutMonitor {
    fn print(&mut self, text: &str) {
        print!("{text}");
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_monitor_captures() {
        let mut mon = StringMonitor::new();
        mon.print("line one\n");
        mon.print("line two\n");
        assert_eq!(mon.lines(), vec!["line one", "line two"]);
        assert!(!mon.is_interactive());
    }
}
