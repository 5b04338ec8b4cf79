//! Shared value types for the action queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Action lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of one action record.
///
/// ```text
/// Pending ──dispatch──▶ InFlight ──ok──────────▶ SettledOk
///    ▲                     │      ──app error───▶ SettledError
///    └──transport failure──┘
/// Pending ──drop_queue──▶ Cancelled
/// ```
///
/// Only `Pending` and `InFlight` are observable through
/// [`crate::ActionQueueService::status`]; settled records are no longer held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Queued, not currently being attempted.
    Pending,
    /// Dispatched, awaiting the connection's reply.
    InFlight,
    /// Resolved with a result.
    SettledOk,
    /// Rejected with an error.
    SettledError,
    /// Rejected by a non-silent queue drop.
    Cancelled,
}

impl ActionState {
    /// Returns `true` for states from which no further transition happens.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SettledOk | Self::SettledError | Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds elapsed between this timestamp and now (saturating at 0).
    pub fn elapsed_ms(self) -> u64 {
        u64::try_from((Utc::now() - self.0).num_milliseconds()).unwrap_or(0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ActionState::Pending.is_terminal());
        assert!(!ActionState::InFlight.is_terminal());
        assert!(ActionState::SettledOk.is_terminal());
        assert!(ActionState::SettledError.is_terminal());
        assert!(ActionState::Cancelled.is_terminal());
    }

    #[test]
    fn test_state_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&ActionState::InFlight).unwrap(),
            "\"in_flight\""
        );
    }
}
