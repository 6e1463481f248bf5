//! Scheduler core - run state, step execution, timeouts, and finalization
//!
//! Everything here executes on the one thread that owns the event loop.
//! "Scheduling" a callback means spawning a local task that sleeps for the
//! requested delay and then re-enters the scheduler; the only cancellable
//! handle is the timeout guard's, which finalize aborts on every path.
//!
//! Two independent callback sources converge on a test's outcome: step
//! dispatches and the timeout guard (plus application quit requests). The
//! `test_done` flag makes finalization exactly-once; the test index carried
//! by every scheduled callback makes late callbacks from an already-resolved
//! test inert even after the next test has started.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::action::Action;
use super::registry::{Step, TestDescriptor, TestOptions, TestRecord, TestStatus};
use super::report::ResultsDisplay;

/// Caller-supplied hook, stored behind a shared cell so the scheduler can
/// invoke it without holding its own state borrow across the call
type Hook = Rc<RefCell<Box<dyn FnMut()>>>;

pub(crate) type DisplayHandle = Rc<RefCell<Box<dyn ResultsDisplay>>>;

/// Run flags accepted by [`Harness::run_host`] and [`Harness::attach`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// `x`: terminate the event loop once all tests have finished
    pub exit_after_tests: bool,
    /// `s`: show the results display once all tests have finished
    pub show_results_after_tests: bool,
}

impl RunFlags {
    /// Parse a flags string (`""`, `"x"`, `"s"`, `"xs"`)
    ///
    /// Combining `x` and `s` runs both: show, then exit.
    pub fn parse(flags: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for c in flags.chars() {
            match c {
                'x' => parsed.exit_after_tests = true,
                's' => parsed.show_results_after_tests = true,
                other => return Err(Error::UnknownFlag(other)),
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Tests may still be registered; no loop bound yet
    Idle,
    /// The scheduler is advancing through the test list
    Running,
    /// All tests resolved; the application owns the loop again
    Finished,
}

/// Resolved outcome handed to the completion resolver
struct Outcome {
    status: TestStatus,
    message: Option<String>,
    trace: Option<String>,
}

impl Outcome {
    fn success() -> Self {
        Self {
            status: TestStatus::Success,
            message: None,
            trace: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Fail,
            message: Some(message.into()),
            trace: None,
        }
    }
}

struct RunState {
    tests: Vec<TestDescriptor>,
    test_index: usize,
    step_index: usize,
    test_done: bool,
    timeout_handle: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
    entry_hook: Option<Hook>,
    reset_hook: Option<Hook>,
    timeout: Duration,
    flags: RunFlags,
    phase: Phase,
    exit_requested: bool,
    loop_bound: bool,
    quit: Option<Rc<Notify>>,
    display: Option<DisplayHandle>,
    report_include_traces: bool,
}

/// The test harness: registry, scheduler, and result ledger in one handle
///
/// `Harness` is a cheap clone over shared state; the application under test
/// and its steps typically each hold a clone. All methods must be called
/// from the event-loop thread — nothing here is `Send`.
#[derive(Clone)]
pub struct Harness {
    state: Rc<RefCell<RunState>>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Create a harness with built-in defaults (5000 ms per-test timeout)
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Create a harness taking its defaults from a [`Config`]
    pub fn from_config(config: &Config) -> Self {
        Self {
            state: Rc::new(RefCell::new(RunState {
                tests: Vec::new(),
                test_index: 0,
                step_index: 0,
                test_done: false,
                timeout_handle: None,
                started_at: None,
                entry_hook: None,
                reset_hook: None,
                timeout: config.test_timeout(),
                flags: RunFlags::default(),
                phase: Phase::Idle,
                exit_requested: false,
                loop_bound: false,
                quit: None,
                display: None,
                report_include_traces: config.report.include_traces,
            })),
        }
    }

    // === Registration and configuration ===

    /// Register a test
    ///
    /// Steps run in insertion order. The step list is owned by the harness
    /// from here on, so later changes on the caller's side cannot affect a
    /// registered test. Duplicate titles are legal and run independently.
    ///
    /// Registration is meant to happen before the run starts; registering
    /// mid-run has undefined ordering relative to tests already dispatched.
    pub fn add_test(&self, title: impl Into<String>, steps: Vec<Step>) {
        self.add_test_with(title, steps, TestOptions::default());
    }

    /// Register a test with explicit [`TestOptions`]
    pub fn add_test_with(&self, title: impl Into<String>, steps: Vec<Step>, options: TestOptions) {
        let mut st = self.state.borrow_mut();
        if st.phase != Phase::Idle {
            tracing::warn!("test registered after run start; ordering is undefined");
        }
        st.tests.push(TestDescriptor::new(title, steps, options));
    }

    /// Set the per-test timeout
    ///
    /// Takes effect for tests that have not started yet; call before the run
    /// starts to cover all of them.
    pub fn set_timeout(&self, timeout: Duration) {
        self.state.borrow_mut().timeout = timeout;
    }

    /// Set the reset hook, called after every test finalizes and before the
    /// next test's entry hook, to tear down application state
    pub fn set_reset_hook<F: FnMut() + 'static>(&self, hook: F) {
        self.state.borrow_mut().reset_hook = Some(Rc::new(RefCell::new(Box::new(hook))));
    }

    /// Register the results display used by `show_results()` and the `s` flag
    pub fn set_display<D: ResultsDisplay + 'static>(&self, display: D) {
        self.state.borrow_mut().display = Some(Rc::new(RefCell::new(Box::new(display))));
    }

    // === Run modes ===

    /// Own mode: create the event loop, run every registered test, and block
    /// until the loop terminates
    ///
    /// `entry` is invoked once per test, before its first step, to (re)build
    /// the application; after the last test it is invoked once more to hand
    /// the application over to normal operation (unless `x` exits the loop).
    ///
    /// Flags: `x` terminates the loop after all tests finish, `s` shows the
    /// results display. Without `x` the loop keeps running until the
    /// application requests quit outside a test.
    pub fn run_host<F>(&self, entry: F, flags: &str) -> Result<()>
    where
        F: FnMut() + 'static,
    {
        let flags = RunFlags::parse(flags)?;
        let quit = Rc::new(Notify::new());
        {
            let mut st = self.state.borrow_mut();
            if st.phase != Phase::Idle || st.loop_bound {
                return Err(Error::AlreadyRunning);
            }
            st.flags = flags;
            st.entry_hook = Some(Rc::new(RefCell::new(Box::new(entry))));
            st.loop_bound = true;
            st.quit = Some(Rc::clone(&quit));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let local = LocalSet::new();

        let harness = self.clone();
        local.spawn_local(async move {
            harness.begin();
        });

        let registered = self.state.borrow().tests.len();
        tracing::info!("event loop starting ({} tests registered)", registered);
        runtime.block_on(local.run_until(async move {
            quit.notified().await;
        }));
        tracing::info!("event loop terminated");

        let mut st = self.state.borrow_mut();
        st.loop_bound = false;
        st.quit = None;
        Ok(())
    }

    /// Attach mode: bind onto a caller-owned event loop
    ///
    /// The scheduler is spawned onto `local`; the caller keeps ownership of
    /// entry/exit, so the `x` flag is rejected here. The caller's runtime
    /// must have timers enabled. Completion is observable via
    /// [`Harness::finished`].
    pub fn attach(&self, local: &LocalSet, flags: &str) -> Result<()> {
        let flags = RunFlags::parse(flags)?;
        if flags.exit_after_tests {
            return Err(Error::ExitFlagInAttachMode);
        }
        {
            let mut st = self.state.borrow_mut();
            if st.phase != Phase::Idle || st.loop_bound {
                return Err(Error::AlreadyRunning);
            }
            st.flags = flags;
            st.loop_bound = true;
        }

        let harness = self.clone();
        local.spawn_local(async move {
            harness.begin();
        });
        Ok(())
    }

    // === Quit interception shim ===

    /// Application-initiated quit request
    ///
    /// During a test this never terminates the loop: it fails the test as an
    /// unexpected termination, or — for tests registered with
    /// `expect_quit` — records it as `exit_requested` for a later step to
    /// assert. Outside a run the quit is honored in own mode and reported in
    /// attach mode.
    pub fn request_quit(&self) {
        enum QuitPath {
            Expected,
            FailTest(usize),
            MidRun,
            ExitLoop(Option<Rc<Notify>>),
        }

        let path = {
            let mut st = self.state.borrow_mut();
            if st.phase == Phase::Running {
                if st.test_index < st.tests.len() && !st.test_done {
                    if st.tests[st.test_index].options.expect_quit {
                        st.exit_requested = true;
                        QuitPath::Expected
                    } else {
                        QuitPath::FailTest(st.test_index)
                    }
                } else {
                    QuitPath::MidRun
                }
            } else {
                QuitPath::ExitLoop(st.quit.clone())
            }
        };

        match path {
            QuitPath::Expected => {
                tracing::debug!("quit request intercepted (expected by current test)");
            }
            QuitPath::FailTest(index) => {
                tracing::debug!("unexpected quit request intercepted during test");
                self.finalize(
                    index,
                    Outcome::fail("app called quit() unexpectedly during test"),
                );
            }
            QuitPath::MidRun => {
                tracing::warn!("quit requested between tests; ignored, run continues");
            }
            QuitPath::ExitLoop(Some(quit)) => {
                tracing::info!("quit requested, stopping event loop");
                quit.notify_one();
            }
            QuitPath::ExitLoop(None) => {
                tracing::warn!("quit requested but the harness does not own an event loop");
            }
        }
    }

    /// Whether the current test's application has requested quit
    ///
    /// Only ever true inside a test registered with `expect_quit`; reset at
    /// the start of every test.
    pub fn exit_requested(&self) -> bool {
        self.state.borrow().exit_requested
    }

    /// Whether every registered test has resolved
    pub fn finished(&self) -> bool {
        self.state.borrow().phase == Phase::Finished
    }

    /// Outcome snapshots in registration order
    pub fn results(&self) -> Vec<TestRecord> {
        self.state
            .borrow()
            .tests
            .iter()
            .map(TestDescriptor::record)
            .collect()
    }

    pub(crate) fn display_handle(&self) -> Option<DisplayHandle> {
        self.state.borrow().display.clone()
    }

    pub(crate) fn is_loop_bound(&self) -> bool {
        self.state.borrow().loop_bound
    }

    pub(crate) fn report_include_traces(&self) -> bool {
        self.state.borrow().report_include_traces
    }

    // === Scheduler internals ===

    /// Schedule `f` to run on the event loop after `delay`
    fn schedule(&self, delay: Duration, f: impl FnOnce(&Harness) + 'static) {
        let harness = self.clone();
        tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            f(&harness);
        });
    }

    fn begin(&self) {
        {
            let mut st = self.state.borrow_mut();
            st.phase = Phase::Running;
            st.test_index = 0;
        }
        self.advance();
    }

    /// Advance the run state machine: set up the next test, or finish
    fn advance(&self) {
        let setup = {
            let mut st = self.state.borrow_mut();
            if st.test_index >= st.tests.len() {
                st.phase = Phase::Finished;
                None
            } else {
                let index = st.test_index;
                st.step_index = 0;
                st.test_done = false;
                st.exit_requested = false;
                st.started_at = Some(Instant::now());

                // Arm the timeout guard for this test
                let timeout = st.timeout;
                let guard = self.clone();
                st.timeout_handle = Some(tokio::task::spawn_local(async move {
                    tokio::time::sleep(timeout).await;
                    guard.on_timeout(index);
                }));

                tracing::debug!(
                    "starting test {}/{}: '{}'",
                    index + 1,
                    st.tests.len(),
                    st.tests[index].title
                );
                Some((index, st.entry_hook.clone()))
            }
        };

        match setup {
            Some((index, entry_hook)) => {
                if let Some(hook) = entry_hook {
                    if invoke_hook(&hook).is_err() {
                        // Application fault while the test is active
                        self.finalize(index, Outcome::fail("Exception in entry hook"));
                        return;
                    }
                }
                self.schedule(Duration::ZERO, move |h| h.dispatch(index));
            }
            None => self.finish_run(),
        }
    }

    /// The `Finished` transition: optionally show results, then either
    /// terminate the loop or hand the application over to normal operation
    fn finish_run(&self) {
        let (flags, quit, entry_hook) = {
            let st = self.state.borrow();
            (st.flags, st.quit.clone(), st.entry_hook.clone())
        };
        tracing::info!("all tests finished");

        if flags.show_results_after_tests {
            if let Err(e) = self.show_results() {
                tracing::warn!("cannot show results: {}", e);
            }
        }

        if flags.exit_after_tests {
            if let Some(quit) = quit {
                quit.notify_one();
            }
        } else if let Some(hook) = entry_hook {
            // Rebuild the application for normal (non-test) operation
            if invoke_hook(&hook).is_err() {
                tracing::error!("panic in entry hook after tests finished");
            }
        }
    }

    /// Execute the current step of test `test_index` and interpret its action
    ///
    /// Invoked only as a scheduled callback. Late callbacks — scheduled
    /// before a finalize that has since happened, or even before a test that
    /// has since ended — drop out on the guards at the top.
    fn dispatch(&self, test_index: usize) {
        let (steps, step_index) = {
            let st = self.state.borrow();
            if st.phase != Phase::Running || st.test_index != test_index || st.test_done {
                tracing::trace!("dropping stale step dispatch for test {}", test_index);
                return;
            }
            (st.tests[test_index].steps(), st.step_index)
        };

        // Steps exhausted: implicit pass
        if step_index >= steps.len() {
            self.finalize(test_index, Outcome::success());
            return;
        }

        let mut step_fn = steps[step_index].borrow_mut();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (*step_fn)()));
        drop(step_fn);

        let action = match result {
            Ok(action) => action,
            Err(payload) => {
                self.finalize(
                    test_index,
                    Outcome {
                        status: TestStatus::Fail,
                        message: Some("Exception in step".to_string()),
                        trace: Some(panic_trace(payload.as_ref())),
                    },
                );
                return;
            }
        };

        match action {
            Action::Fail { message } => self.finalize(test_index, Outcome::fail(message)),
            Action::Success { delay: None } => self.finalize(test_index, Outcome::success()),
            Action::Success { delay: Some(delay) } => {
                // The timeout guard may still win this race; finalize's
                // guards make the loser a no-op
                self.schedule(delay, move |h| h.finalize(test_index, Outcome::success()));
            }
            Action::Next { delay } => {
                if self.bump_step(test_index, |step| step + 1) {
                    self.schedule(delay.unwrap_or(Duration::ZERO), move |h| {
                        h.dispatch(test_index)
                    });
                }
            }
            Action::Wait { delay } => self.schedule(delay, move |h| h.dispatch(test_index)),
            Action::Goto { step } => {
                if self.bump_step(test_index, move |_| step) {
                    self.schedule(Duration::ZERO, move |h| h.dispatch(test_index));
                }
            }
        }
    }

    /// Move the step cursor, unless the test resolved during the step call
    /// (e.g. an intercepted quit); returns whether the move happened
    fn bump_step(&self, test_index: usize, f: impl FnOnce(usize) -> usize) -> bool {
        let mut st = self.state.borrow_mut();
        if st.test_index != test_index || st.test_done {
            return false;
        }
        st.step_index = f(st.step_index);
        true
    }

    /// Timeout guard expiry for test `test_index`
    fn on_timeout(&self, test_index: usize) {
        {
            let st = self.state.borrow();
            // Tolerate a duplicate or late fire; finalize should have
            // aborted us already
            if st.phase != Phase::Running || st.test_index != test_index || st.test_done {
                return;
            }
        }
        tracing::debug!("test {} timed out", test_index);
        self.finalize(
            test_index,
            Outcome {
                status: TestStatus::Timeout,
                message: Some("Test timed out".to_string()),
                trace: None,
            },
        );
    }

    /// Completion resolver: the single idempotent gate to a test's outcome
    ///
    /// Exactly one caller wins per test — explicit result, step fault,
    /// timeout, or intercepted quit; every later call is a no-op.
    fn finalize(&self, test_index: usize, outcome: Outcome) {
        let reset_hook = {
            let mut st = self.state.borrow_mut();
            if st.test_index != test_index || st.test_done {
                return;
            }
            st.test_done = true;

            let elapsed = st.started_at.take().map(|at| at.elapsed());
            if let Some(handle) = st.timeout_handle.take() {
                handle.abort();
            }

            let test = &mut st.tests[test_index];
            test.status = outcome.status;
            test.fail_message = outcome.message;
            test.panic_trace = outcome.trace;
            tracing::debug!(
                "test '{}' finished: {} ({} ms)",
                test.title,
                test.status,
                elapsed.unwrap_or_default().as_millis()
            );

            st.reset_hook.clone()
        };

        if let Some(hook) = reset_hook {
            // A reset hook fault must not take the run down with it
            if invoke_hook(&hook).is_err() {
                tracing::error!("panic in reset hook; continuing with next test");
            }
        }

        self.state.borrow_mut().test_index += 1;
        self.schedule(Duration::ZERO, |h| h.advance());
    }
}

/// Invoke a caller-supplied hook, containing any panic
fn invoke_hook(hook: &Hook) -> std::result::Result<(), Box<dyn Any + Send>> {
    let mut hook_fn = hook.borrow_mut();
    panic::catch_unwind(AssertUnwindSafe(|| (*hook_fn)()))
}

/// Render a caught panic payload plus a forced backtrace
fn panic_trace(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    format!(
        "panic: {}\n{}",
        message,
        std::backtrace::Backtrace::force_capture()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert_eq!(RunFlags::parse("").unwrap(), RunFlags::default());
        assert!(RunFlags::parse("x").unwrap().exit_after_tests);
        assert!(RunFlags::parse("s").unwrap().show_results_after_tests);

        let both = RunFlags::parse("xs").unwrap();
        assert!(both.exit_after_tests && both.show_results_after_tests);

        match RunFlags::parse("xq") {
            Err(Error::UnknownFlag(c)) => assert_eq!(c, 'q'),
            other => panic!("expected UnknownFlag, got {other:?}"),
        }
    }

    #[test]
    fn test_attach_rejects_exit_flag() {
        let harness = Harness::new();
        let local = LocalSet::new();
        match harness.attach(&local, "x") {
            Err(Error::ExitFlagInAttachMode) => {}
            other => panic!("expected ExitFlagInAttachMode, got {other:?}"),
        }
        // The rejection must leave the harness unbound
        assert!(!harness.is_loop_bound());
    }

    #[test]
    fn test_quit_outside_any_loop_is_reported_not_fatal() {
        let harness = Harness::new();
        harness.request_quit();
        assert!(!harness.exit_requested());
    }

    #[test]
    fn test_panic_trace_captures_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom".to_string());
        let trace = panic_trace(payload.as_ref());
        assert!(trace.starts_with("panic: boom"));
        assert!(!trace.is_empty());
    }
}
