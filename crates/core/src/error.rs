//! Error taxonomy for the call pipeline
//!
//! Per-turn provider failures (`ProviderTimeout`, `ProviderRejected`) are
//! recovered locally: the turn fails and the session stays active.
//! `StreamClosed` and `MalformedSessionStart` are session-level failures.
//! `Cancelled` is the expected result of barge-in and is never surfaced or
//! logged as a failure.

use std::time::Duration;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A provider call exceeded its bounded timeout
    #[error("provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// The provider refused the request (bad credentials, quota, malformed input)
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    /// The caller-facing stream closed (caller hung up)
    #[error("stream closed")]
    StreamClosed,

    /// Required session metadata was missing or invalid
    #[error("malformed session start: {0}")]
    MalformedSessionStart(String),

    /// Cooperative cancellation after barge-in. Expected, not a failure.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is recoverable within the session (the turn fails,
    /// the session stays active awaiting the next utterance).
    pub fn is_turn_recoverable(&self) -> bool {
        matches!(self, Error::ProviderTimeout(_) | Error::ProviderRejected(_))
    }

    /// Whether this is the expected barge-in cancellation, never an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
