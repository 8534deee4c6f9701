//! Decision trace
//!
//! Every decision line is logged at INFO as it happens and kept in memory.
//! When a run finds nothing, a single WARN event carries a summary followed
//! by all recorded lines, so the live log and the replayed trace read the same.

use tracing::{info, warn};

/// Log lines recorded during one grouping run
#[derive(Debug, Default, Clone)]
pub struct DecisionTrace {
    lines: Vec<String>,
}

impl DecisionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and keep a decision line
    pub fn record(&mut self, line: String) {
        info!(target: "segstore::grouping", "{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Summary followed by the recorded lines
    pub fn report(&self, summary: &str) -> String {
        format!("{}\n\nLog:\n{}", summary, self.lines.join("\n"))
    }

    /// Emit the no-result report as one WARN event and return its text
    pub fn warn_no_result(&self, summary: &str) -> String {
        let report = self.report(summary);
        warn!(target: "segstore::grouping", "{}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_layout() {
        let mut trace = DecisionTrace::new();
        assert!(trace.is_empty());
        trace.record("first".to_string());
        trace.record("second".to_string());

        assert_eq!(trace.report("Nothing found"), "Nothing found\n\nLog:\nfirst\nsecond");
        assert_eq!(trace.warn_no_result("Nothing found"), trace.report("Nothing found"));
        assert_eq!(trace.into_lines(), vec!["first", "second"]);
    }
}
