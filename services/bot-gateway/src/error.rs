//! Gateway error taxonomy
//!
//! Failures are contained at the nearest boundary that can still report
//! them: command-level errors become `error` status events, never panics.

use thiserror::Error;

/// Errors raised by the container runtime driver.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime engine cannot be reached at all.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// A single create/stop/remove/list call failed.
    #[error("container operation failed: {0}")]
    Operation(String),
}

/// Errors surfaced by the gateway's command path.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Topic shape or payload schema violation. Dropped with a log line,
    /// no status event (no worker id may be resolvable).
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}
