//! Counter demo - a model-level counter application driven by the harness
//!
//! The "application" here is plain state plus handlers (a click handler and
//! a window-close handler); a real host would wire the same handlers to
//! actual widgets. The tests click the increment handler and verify the
//! label text, and the last one exercises the application's own quit path.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;

use steploop::common::config::Config;
use steploop::common::logging;
use steploop::{Action, Harness, ResultsDisplay, Step, TestOptions};

#[derive(Parser)]
#[command(name = "counter-demo", about = "Counter application driven by the steploop harness")]
#[command(version, long_about = None)]
struct Args {
    /// Terminate the event loop once all tests finish
    #[arg(long)]
    exit_after: bool,

    /// Show the results display once all tests finish
    #[arg(long)]
    show_results: bool,

    /// Per-test timeout in milliseconds (overrides the config file)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Read harness defaults from this TOML file instead of the platform
    /// config path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the report to this path after the run
    #[arg(long)]
    write_results: Option<PathBuf>,

    /// Write the report as JSON instead of text
    #[arg(long, requires = "write_results")]
    json: bool,
}

/// Application state and handlers
struct CounterApp {
    count: u32,
    label: String,
    harness: Harness,
}

impl CounterApp {
    fn new(harness: Harness) -> Self {
        Self {
            count: 0,
            label: "0".to_string(),
            harness,
        }
    }

    /// Increment-button click handler
    fn click_increment(&mut self) {
        self.count += 1;
        self.label = self.count.to_string();
    }

    /// Window-close handler: route shutdown through the harness
    fn close_window(&mut self) {
        self.harness.request_quit();
    }
}

type SharedApp = Rc<RefCell<Option<CounterApp>>>;

fn with_app<R>(app: &SharedApp, f: impl FnOnce(&mut CounterApp) -> R) -> Option<R> {
    app.borrow_mut().as_mut().map(f)
}

/// Results "window": a framed console rendering
struct ConsoleResultsWindow;

impl ResultsDisplay for ConsoleResultsWindow {
    fn show(&mut self, report: &str) {
        println!("+--- test results ------------------------------");
        for line in report.lines() {
            println!("| {line}");
        }
        println!("+-----------------------------------------------");
    }
}

// === Tests ===

fn test_initial_state(app: &SharedApp) -> Vec<Step> {
    let app = Rc::clone(app);
    vec![Box::new(move || match with_app(&app, |a| a.label.clone()) {
        Some(label) if label == "0" => Action::success(),
        Some(label) => Action::fail(format!("initial value should be '0', got '{label}'")),
        None => Action::fail("application not built"),
    })]
}

fn test_increment_once(app: &SharedApp) -> Vec<Step> {
    let click_app = Rc::clone(app);
    let verify_app = Rc::clone(app);
    vec![
        Box::new(move || match with_app(&click_app, |a| a.click_increment()) {
            Some(()) => Action::next(),
            None => Action::fail("application not built"),
        }),
        Box::new(move || match with_app(&verify_app, |a| a.label.clone()) {
            Some(label) if label == "1" => Action::success(),
            Some(label) => Action::fail(format!("expected '1', got '{label}'")),
            None => Action::fail("application not built"),
        }),
    ]
}

fn test_increment_three_times(app: &SharedApp) -> Vec<Step> {
    let click_app = Rc::clone(app);
    let verify_app = Rc::clone(app);
    vec![
        Box::new(move || {
            match with_app(&click_app, |a| {
                a.click_increment();
                a.click_increment();
                a.click_increment();
            }) {
                Some(()) => Action::next(),
                None => Action::fail("application not built"),
            }
        }),
        Box::new(move || match with_app(&verify_app, |a| a.label.clone()) {
            Some(label) if label == "3" => Action::success(),
            Some(label) => Action::fail(format!("expected '3', got '{label}'")),
            None => Action::fail("application not built"),
        }),
    ]
}

/// Paced variant for watching the run: one click per event-loop beat
fn test_slow_increment(app: &SharedApp) -> Vec<Step> {
    let beat = Duration::from_millis(200);
    let mut steps: Vec<Step> = Vec::new();
    for _ in 0..3 {
        let click_app = Rc::clone(app);
        steps.push(Box::new(move || {
            match with_app(&click_app, |a| a.click_increment()) {
                Some(()) => Action::next_after(beat),
                None => Action::fail("application not built"),
            }
        }));
    }
    let verify_app = Rc::clone(app);
    steps.push(Box::new(move || {
        match with_app(&verify_app, |a| a.label.clone()) {
            Some(label) if label == "3" => Action::success_after(beat),
            Some(label) => Action::fail(format!("expected '3', got '{label}'")),
            None => Action::fail("application not built"),
        }
    }));
    steps
}

fn test_close_requests_quit(app: &SharedApp, harness: &Harness) -> Vec<Step> {
    let close_app = Rc::clone(app);
    let harness = harness.clone();
    vec![Box::new(move || {
        if with_app(&close_app, |a| a.close_window()).is_none() {
            return Action::fail("application not built");
        }
        if harness.exit_requested() {
            Action::success()
        } else {
            Action::fail("close handler did not route quit through the harness")
        }
    })]
}

fn run(args: Args) -> steploop::Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load()?,
    };

    let harness = Harness::from_config(&config);
    if let Some(ms) = args.timeout_ms {
        harness.set_timeout(Duration::from_millis(ms));
    }
    harness.set_display(ConsoleResultsWindow);

    let app: SharedApp = Rc::new(RefCell::new(None));

    let reset_app = Rc::clone(&app);
    harness.set_reset_hook(move || {
        *reset_app.borrow_mut() = None;
    });

    harness.add_test("Initial state is zero", test_initial_state(&app));
    harness.add_test("Increment once", test_increment_once(&app));
    harness.add_test("Increment three times", test_increment_three_times(&app));
    harness.add_test("Visual: slow increment", test_slow_increment(&app));
    harness.add_test_with(
        "Close window requests quit",
        test_close_requests_quit(&app, &harness),
        TestOptions { expect_quit: true },
    );

    let mut flags = String::new();
    if args.show_results {
        flags.push('s');
    }
    if args.exit_after {
        flags.push('x');
    }

    let entry_app = Rc::clone(&app);
    let entry_harness = harness.clone();
    harness.run_host(
        move || {
            *entry_app.borrow_mut() = Some(CounterApp::new(entry_harness.clone()));
        },
        &flags,
    )?;

    println!();
    harness.print_results();

    if let Some(path) = &args.write_results {
        if args.json {
            harness.write_results_json(path)?;
        } else {
            harness.write_results(path)?;
        }
        println!("Results written to {}", path.display());
    }

    Ok(())
}

fn main() {
    logging::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
