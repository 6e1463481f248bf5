//! Test registry types
//!
//! A test is a title plus an ordered list of steps, fixed at registration.
//! Descriptors live for the whole run; only the completion resolver writes
//! their outcome fields.

use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::action::Action;

/// A single unit of test logic, invoked repeatedly by the step executor
pub type Step = Box<dyn FnMut() -> Action>;

/// Per-test options
///
/// `expect_quit` marks a test whose application is expected to request quit
/// mid-test; the quit is then recorded as `exit_requested` instead of
/// failing the test.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestOptions {
    /// The application under test is expected to call `request_quit()`
    pub expect_quit: bool,
}

/// Terminal (or pending) status of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Not yet executed
    Pending,
    /// Passed (explicitly or by exhausting its steps)
    Success,
    /// Failed (explicit fail, step fault, or intercepted quit)
    Fail,
    /// Did not resolve within the per-test timeout
    Timeout,
}

impl TestStatus {
    /// Lowercase status name, matching the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Success => "success",
            TestStatus::Fail => "fail",
            TestStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered test and its outcome fields
pub(crate) struct TestDescriptor {
    pub(crate) title: String,
    steps: Rc<Vec<RefCell<Step>>>,
    pub(crate) options: TestOptions,
    pub(crate) status: TestStatus,
    pub(crate) fail_message: Option<String>,
    pub(crate) panic_trace: Option<String>,
}

impl TestDescriptor {
    pub(crate) fn new(title: impl Into<String>, steps: Vec<Step>, options: TestOptions) -> Self {
        Self {
            title: title.into(),
            steps: Rc::new(steps.into_iter().map(RefCell::new).collect()),
            options,
            status: TestStatus::Pending,
            fail_message: None,
            panic_trace: None,
        }
    }

    /// Shared handle to the step list, so the executor can invoke a step
    /// without holding the scheduler's own state borrow across the call
    pub(crate) fn steps(&self) -> Rc<Vec<RefCell<Step>>> {
        Rc::clone(&self.steps)
    }

    pub(crate) fn record(&self) -> TestRecord {
        TestRecord {
            title: self.title.clone(),
            status: self.status,
            fail_message: self.fail_message.clone(),
            panic_trace: self.panic_trace.clone(),
        }
    }
}

/// Outcome snapshot of a single test, in registration order
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    /// Title given at registration
    pub title: String,
    /// Resolved status (`pending` only if the run never reached the test)
    pub status: TestStatus,
    /// Failure or timeout message, when present
    pub fail_message: Option<String>,
    /// Captured panic payload and backtrace for step faults
    pub panic_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_descriptor_is_pending() {
        let descriptor = TestDescriptor::new(
            "fresh",
            vec![Box::new(Action::success) as Step],
            TestOptions::default(),
        );
        assert_eq!(descriptor.status, TestStatus::Pending);
        assert!(descriptor.fail_message.is_none());
        assert_eq!(descriptor.steps().len(), 1);
    }

    #[test]
    fn test_status_names_are_lexicographic_in_report_order() {
        let names = ["fail", "pending", "success", "timeout"];
        let mut sorted = names;
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_record_serializes_lowercase_status() {
        let descriptor = TestDescriptor::new("t", Vec::new(), TestOptions::default());
        let json = serde_json::to_value(descriptor.record()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["title"], "t");
    }
}
