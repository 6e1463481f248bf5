//! steploop - cooperative step-based test harness for single-threaded
//! event-loop applications
//!
//! A test is an ordered list of steps; a step is a closure that drives or
//! inspects the live application and returns an [`Action`] (succeed, fail,
//! advance, wait, jump). The harness executes tests one at a time on the
//! event loop, races each against a per-test timeout, resolves every test
//! exactly once, and renders an aggregate report.
//!
//! # Example
//!
//! ```rust,no_run
//! use steploop::{Action, Harness, Step};
//!
//! let harness = Harness::new();
//! harness.add_test(
//!     "two steps then pass",
//!     vec![
//!         Box::new(Action::next) as Step,
//!         Box::new(Action::success) as Step,
//!     ],
//! );
//! harness.run_host(|| { /* (re)build the application */ }, "x").unwrap();
//! harness.print_results();
//! ```

pub mod common;
pub mod harness;

// Re-export the public surface at the crate root
pub use common::{Error, Result};
pub use harness::{Action, Harness, ResultsDisplay, RunFlags, Step, TestOptions, TestRecord, TestStatus};
