//! Error types for the action queue.
//!
//! Two layers of failure exist and they must not be confused:
//!
//! - [`DispatchError`] is what a [`crate::BackgroundConnection`] returns for a
//!   single call. It is tagged: the channel died ([`DispatchError::Disconnected`])
//!   or the remote method failed ([`DispatchError::Application`]).
//! - [`BackgroundError`] is what a caller of the public API sees. Transport
//!   failures never reach it in the suspendable execution model; they are
//!   absorbed as retry signals by the queue processor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Remote method failure
// ---------------------------------------------------------------------------

/// Failure reported by the background context for a method it did execute
/// (invalid arguments, domain-level failure, unknown method).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApplicationError {
    /// Human-readable description supplied by the background method.
    pub message: String,

    /// Optional numeric error code (JSON-RPC style).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Optional structured payload accompanying the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApplicationError {
    /// Creates an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Attaches a numeric error code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Per-call transport outcome
// ---------------------------------------------------------------------------

/// Failure of one call dispatched through a [`crate::BackgroundConnection`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The channel to the background context went away before a reply arrived.
    ///
    /// The queue processor requeues the record at the front and stops draining.
    #[error("background connection lost: {reason}")]
    Disconnected {
        /// Transport-specific description of the disconnect.
        reason: String,
    },

    /// The background method ran and failed.
    ///
    /// The queue processor rejects the record and moves on to the next one.
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl DispatchError {
    /// Convenience constructor for [`DispatchError::Disconnected`].
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this failure means the transport is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

// ---------------------------------------------------------------------------
// Caller-visible errors
// ---------------------------------------------------------------------------

/// Errors delivered to callers of [`crate::ActionQueueService`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackgroundError {
    /// The background method failed; forwarded unchanged.
    #[error(transparent)]
    Application(#[from] ApplicationError),

    /// The record was still queued when [`crate::ActionQueueService::drop_queue`]
    /// ran in non-silent mode.
    #[error("Background operation cancelled while waiting for connection.")]
    Cancelled,

    /// Persistent execution model only: the connection failed mid-call. There is
    /// no queue to retry from.
    #[error("background connection lost: {reason}")]
    Disconnected {
        /// Transport-specific description of the disconnect.
        reason: String,
    },

    /// Persistent execution model only: no connection has been installed.
    #[error("no background connection is installed")]
    NotConnected,

    /// The dispatch machinery itself failed (the call task panicked or was
    /// torn down) rather than the remote method.
    #[error("internal dispatch failure: {message}")]
    Internal {
        /// Description of the fault.
        message: String,
    },
}

impl From<DispatchError> for BackgroundError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Disconnected { reason } => Self::Disconnected { reason },
            DispatchError::Application(e) => Self::Application(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Invalid configuration input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("Configuration could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value was syntactically valid but not acceptable.
    #[error("Configuration error: {message}")]
    Invalid {
        /// Description of the configuration problem.
        message: String,
    },
}
