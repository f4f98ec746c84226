//! Error taxonomy for the hub and its connections.
//!
//! - [`HubError`]: surfaced to producers calling into the hub
//! - [`ConnectionError`]: read/write failures on one client's stream; these
//!   only ever terminate that client's pumps
//! - [`MalformedMessage`]: an inbound frame that could not be understood;
//!   readers drop it and carry on
//!
//! Backpressure eviction is a policy outcome, not an error, and has no type here.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the hub's producer entry points.
#[derive(Debug, Error)]
pub enum HubError {
    /// The payload could not be encoded. Nothing was enqueued.
    #[error("failed to serialize broadcast payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The hub has shut down (or is shutting down) and accepts no more work.
    #[error("hub is closed")]
    Closed,
}

impl HubError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "serialization",
            Self::Closed => "closed",
        }
    }
}

/// Failure on a single client's duplex stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The underlying transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A read or write did not complete within its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Wrap any displayable transport error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// An inbound client frame that could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed client message: {reason}")]
pub struct MalformedMessage {
    /// What was wrong with the frame.
    pub reason: String,
}

impl MalformedMessage {
    /// Build from any displayable cause.
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}
