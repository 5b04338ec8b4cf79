//! Newtype identifiers used by the action queue.
//!
//! [`ActionId`] names one logical call. Two submissions carrying the same
//! [`ActionId`] are the same call as far as the queue is concerned, which is
//! what makes resubmission idempotent.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Identifies a single logical call into the background context.
///
/// Either supplied by the caller (to make a resubmission idempotent) or
/// produced by [`ActionId::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(String);

impl ActionId {
    /// Creates an identifier from a caller-chosen value, returning `None` if the
    /// value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Generates a fresh identifier.
    ///
    /// Format is `"<unix-millis>-<uuid-v4-simple>"`: the timestamp keeps ids
    /// roughly sortable by creation time, the 122 random bits make collisions
    /// negligible even within one millisecond.
    pub fn generate() -> Self {
        Self(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConnectionGeneration
// ---------------------------------------------------------------------------

/// Sequence number assigned to each connection installed in the registry.
///
/// Starts at 1 for the first install; `0` is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionGeneration(u64);

impl ConnectionGeneration {
    /// Creates a generation from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the generation that follows this one.
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for ConnectionGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
