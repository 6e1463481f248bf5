//! Result ledger rendering
//!
//! One `[STATUS] title` line per test in registration order, an indented
//! message line when present, then a summary counting outcomes grouped by
//! status name in lexicographic order. The same records serialize to JSON
//! for consumption by external checkers.

use std::fmt::Write as _;
use std::path::Path;

use colored::Colorize;

use crate::common::{Error, Result};

use super::registry::{TestRecord, TestStatus};
use super::scheduler::Harness;

/// Results display collaborator (e.g. a read-only report window)
///
/// The harness renders the report; how it is presented is entirely up to
/// the implementation.
pub trait ResultsDisplay {
    /// Present the rendered textual report
    fn show(&mut self, report: &str);
}

/// Status names in summary order
const STATUS_NAMES: [&str; 4] = ["fail", "pending", "success", "timeout"];

/// Render the textual report
pub(crate) fn render_text(records: &[TestRecord], include_traces: bool) -> String {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "[{}] {}",
            record.status.name().to_uppercase(),
            record.title
        );
        if let Some(message) = &record.fail_message {
            let _ = writeln!(out, "    {message}");
        }
        if include_traces {
            if let Some(trace) = &record.panic_trace {
                for line in trace.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }
    }
    let _ = writeln!(out, "{}", summary_line(records));
    out
}

/// Build the summary line, listing only statuses that occur
pub(crate) fn summary_line(records: &[TestRecord]) -> String {
    let counts = STATUS_NAMES.map(|name| {
        records
            .iter()
            .filter(|record| record.status.name() == name)
            .count()
    });

    let parts: Vec<String> = STATUS_NAMES
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| format!("{count} {name}"))
        .collect();

    if parts.is_empty() {
        "Summary: no tests".to_string()
    } else {
        format!("Summary: {}", parts.join(", "))
    }
}

impl Harness {
    /// The textual report as a string
    pub fn results_text(&self) -> String {
        render_text(&self.results(), self.report_include_traces())
    }

    /// Print the report to the console, with colored status markers
    pub fn print_results(&self) {
        let records = self.results();
        for record in &records {
            let tag = format!("[{}]", record.status.name().to_uppercase());
            let tag = match record.status {
                TestStatus::Success => tag.green(),
                TestStatus::Fail => tag.red(),
                TestStatus::Timeout => tag.yellow(),
                TestStatus::Pending => tag.dimmed(),
            };
            println!("{} {}", tag, record.title);
            if let Some(message) = &record.fail_message {
                println!("    {}", message.dimmed());
            }
        }
        println!("{}", summary_line(&records));
    }

    /// Write the textual report to a file
    pub fn write_results(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.results_text())?;
        Ok(())
    }

    /// Write the report as a JSON array of records
    pub fn write_results_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.results())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Hand the rendered report to the registered [`ResultsDisplay`]
    ///
    /// Requires a bound event loop and a registered display.
    pub fn show_results(&self) -> Result<()> {
        if !self.is_loop_bound() {
            return Err(Error::LoopNotBound);
        }
        let display = self.display_handle().ok_or(Error::NoDisplay)?;
        let report = self.results_text();
        display.borrow_mut().show(&report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, status: TestStatus, message: Option<&str>) -> TestRecord {
        TestRecord {
            title: title.to_string(),
            status,
            fail_message: message.map(str::to_string),
            panic_trace: None,
        }
    }

    #[test]
    fn test_render_text_format() {
        let records = vec![
            record("first", TestStatus::Success, None),
            record("second", TestStatus::Fail, Some("deliberate")),
            record("third", TestStatus::Timeout, Some("Test timed out")),
        ];
        let text = render_text(&records, false);
        let expected = "\
[SUCCESS] first
[FAIL] second
    deliberate
[TIMEOUT] third
    Test timed out
Summary: 1 fail, 1 success, 1 timeout
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_summary_orders_statuses_lexicographically() {
        let records = vec![
            record("a", TestStatus::Timeout, None),
            record("b", TestStatus::Success, None),
            record("c", TestStatus::Success, None),
            record("d", TestStatus::Fail, None),
        ];
        assert_eq!(
            summary_line(&records),
            "Summary: 1 fail, 2 success, 1 timeout"
        );
    }

    #[test]
    fn test_summary_skips_absent_statuses() {
        let records = vec![record("a", TestStatus::Success, None)];
        assert_eq!(summary_line(&records), "Summary: 1 success");
        assert_eq!(summary_line(&[]), "Summary: no tests");
    }

    #[test]
    fn test_traces_included_only_on_request() {
        let mut rec = record("a", TestStatus::Fail, Some("Exception in step"));
        rec.panic_trace = Some("panic: boom\nframe one".to_string());
        let records = vec![rec];

        let without = render_text(&records, false);
        assert!(!without.contains("frame one"));

        let with = render_text(&records, true);
        assert!(with.contains("    panic: boom"));
        assert!(with.contains("    frame one"));
    }

    #[test]
    fn test_json_records_round_trip() {
        let records = vec![record("first", TestStatus::Fail, Some("deliberate"))];
        let json = serde_json::to_string(&records).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["title"], "first");
        assert_eq!(parsed[0]["status"], "fail");
        assert_eq!(parsed[0]["fail_message"], "deliberate");
    }
}
