//! Step action protocol
//!
//! Every step returns an [`Action`] telling the scheduler what to do next.
//! The scheduler matches on it exhaustively, so a malformed action is a
//! compile-time impossibility for closure-authored steps; [`Action::parse`]
//! exists for layers that construct actions dynamically (scripted or
//! configured step tables) and is where the "unknown action" failure lives.

use std::time::Duration;

use crate::common::{Error, Result};

/// Control action returned by a test step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The test passes, now or after an optional delay
    Success { delay: Option<Duration> },

    /// The test fails immediately with a message
    Fail { message: String },

    /// Advance to the following step after an optional delay (default 0)
    Next { delay: Option<Duration> },

    /// Re-invoke the same step after a delay
    Wait { delay: Duration },

    /// Jump to an arbitrary step index (backward jumps included)
    Goto { step: usize },
}

impl Action {
    /// Pass the current test immediately
    pub fn success() -> Self {
        Self::Success { delay: None }
    }

    /// Pass the current test after `delay`
    pub fn success_after(delay: Duration) -> Self {
        Self::Success { delay: Some(delay) }
    }

    /// Fail the current test with a message
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
        }
    }

    /// Advance to the next step on the next event-loop turn
    pub fn next() -> Self {
        Self::Next { delay: None }
    }

    /// Advance to the next step after `delay`
    pub fn next_after(delay: Duration) -> Self {
        Self::Next { delay: Some(delay) }
    }

    /// Re-invoke the current step after `delay`
    pub fn wait(delay: Duration) -> Self {
        Self::Wait { delay }
    }

    /// Jump to step index `step`
    pub fn goto(step: usize) -> Self {
        Self::Goto { step }
    }

    /// Parse a dynamically constructed action of the form `tag` or
    /// `tag:value` (e.g. `"success"`, `"next:100"`, `"wait:50"`,
    /// `"fail:broken widget"`, `"goto:2"`).
    ///
    /// Delays are in milliseconds. Unknown tags are rejected with
    /// [`Error::UnknownAction`]; a missing or malformed payload is a
    /// configuration error.
    pub fn parse(input: &str) -> Result<Self> {
        let (tag, value) = match input.split_once(':') {
            Some((tag, value)) => (tag.trim(), Some(value.trim())),
            None => (input.trim(), None),
        };

        let parse_ms = |value: Option<&str>| -> Result<Option<Duration>> {
            match value {
                None => Ok(None),
                Some(v) => v
                    .parse::<u64>()
                    .map(|ms| Some(Duration::from_millis(ms)))
                    .map_err(|_| Error::Config(format!("invalid delay '{v}' in action '{input}'"))),
            }
        };

        match tag {
            "success" => Ok(Self::Success {
                delay: parse_ms(value)?,
            }),
            "fail" => {
                let message = value
                    .ok_or_else(|| Error::Config(format!("action '{input}' requires a message")))?;
                Ok(Self::fail(message))
            }
            "next" => Ok(Self::Next {
                delay: parse_ms(value)?,
            }),
            "wait" => {
                let delay = parse_ms(value)?.ok_or_else(|| {
                    Error::Config(format!("action '{input}' requires a delay in ms"))
                })?;
                Ok(Self::Wait { delay })
            }
            "goto" => {
                let target = value
                    .ok_or_else(|| Error::Config(format!("action '{input}' requires a step index")))?;
                let step = target.parse::<usize>().map_err(|_| {
                    Error::Config(format!("invalid step index '{target}' in action '{input}'"))
                })?;
                Ok(Self::Goto { step })
            }
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}
