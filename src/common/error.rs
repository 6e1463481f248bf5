//! Error types for the harness
//!
//! Configuration misuse is reported synchronously through these variants;
//! faults inside tests never surface here — they are resolved into the
//! owning test's outcome instead.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Run mode errors ===
    #[error("flag 'x' (exit after tests) is only valid in own mode; attach mode never owns loop shutdown")]
    ExitFlagInAttachMode,

    #[error("unknown run flag '{0}' (valid flags: 'x' exit after tests, 's' show results)")]
    UnknownFlag(char),

    #[error("harness is already bound to an event loop; create a new harness for another run")]
    AlreadyRunning,

    // === Results display errors ===
    #[error("no event loop bound; call run_host() or attach() before show_results()")]
    LoopNotBound,

    #[error("no results display registered; call set_display() first")]
    NoDisplay,

    // === Step action errors ===
    #[error("unknown step action '{0}'")]
    UnknownAction(String),

    // === Configuration errors ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
