//! Action records: one requested call plus the continuation that settles it.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{ActionId, ActionState, BackgroundError, Timestamp};

/// What a settled action delivers to its caller.
pub type ActionOutcome = Result<Value, BackgroundError>;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// The method and arguments of a call. Both are opaque to the queue and are
/// forwarded to the connection verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Name of the background method.
    pub method: String,
    /// Ordered argument list.
    pub args: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Continuation
// ---------------------------------------------------------------------------

/// Settles one caller exactly once.
///
/// `resolve` and `reject` consume the continuation, so a second settlement is
/// unrepresentable. Dropping it without settling leaves the caller's
/// [`crate::PendingAction`] unresolved forever.
#[derive(Debug)]
pub struct Continuation {
    sender: oneshot::Sender<ActionOutcome>,
}

impl Continuation {
    /// Creates a continuation and the receiver its caller awaits.
    pub(crate) fn channel() -> (Self, oneshot::Receiver<ActionOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Settles the caller with a result.
    pub fn resolve(self, value: Value) {
        self.settle(Ok(value));
    }

    /// Settles the caller with an error.
    pub fn reject(self, error: BackgroundError) {
        self.settle(Err(error));
    }

    fn settle(self, outcome: ActionOutcome) {
        if self.sender.send(outcome).is_err() {
            tracing::trace!("caller stopped waiting before the action settled");
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A call awaiting execution.
#[derive(Debug)]
pub struct ActionRecord {
    id: ActionId,
    request: ActionRequest,
    continuation: Continuation,
    enqueued_at: Timestamp,
    attempts: u32,
}

impl ActionRecord {
    /// Creates a record in the [`ActionState::Pending`] state.
    pub fn new(id: ActionId, request: ActionRequest, continuation: Continuation) -> Self {
        Self {
            id,
            request,
            continuation,
            enqueued_at: Timestamp::now(),
            attempts: 0,
        }
    }

    /// Identifier used for de-duplication.
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    /// Method and arguments.
    pub fn request(&self) -> &ActionRequest {
        &self.request
    }

    /// When the record was first submitted.
    pub fn enqueued_at(&self) -> Timestamp {
        self.enqueued_at
    }

    /// Number of dispatch attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Splits the record for dispatch, counting the attempt.
    ///
    /// The request travels to the connection; the rest stays with the
    /// processor so the record can be rebuilt by [`InFlight::into_record`] if the
    /// transport fails.
    pub(crate) fn begin_attempt(self) -> (InFlight, ActionRequest) {
        let attempts = self.attempts + 1;
        tracing::trace!(
            action_id = %self.id,
            attempt = attempts,
            state = ?ActionState::InFlight,
            "action dispatched"
        );
        (
            InFlight {
                id: self.id,
                continuation: self.continuation,
                enqueued_at: self.enqueued_at,
                attempts,
            },
            self.request,
        )
    }

    /// Rejects the record as cancelled by a queue drop.
    pub(crate) fn cancel(self) {
        tracing::trace!(action_id = %self.id, state = ?ActionState::Cancelled, "action cancelled");
        self.continuation.reject(BackgroundError::Cancelled);
    }
}

/// The part of a record held by the processor while its request is in flight.
#[derive(Debug)]
pub(crate) struct InFlight {
    id: ActionId,
    continuation: Continuation,
    enqueued_at: Timestamp,
    attempts: u32,
}

impl InFlight {
    pub(crate) fn id(&self) -> &ActionId {
        &self.id
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn enqueued_at(&self) -> Timestamp {
        self.enqueued_at
    }

    pub(crate) fn resolve(self, value: Value) {
        tracing::trace!(action_id = %self.id, state = ?ActionState::SettledOk, "action settled");
        self.continuation.resolve(value);
    }

    pub(crate) fn reject(self, error: BackgroundError) {
        tracing::trace!(action_id = %self.id, state = ?ActionState::SettledError, "action settled");
        self.continuation.reject(error);
    }

    /// Reassembles a pending record after a transport failure.
    pub(crate) fn into_record(self, request: ActionRequest) -> ActionRecord {
        tracing::trace!(action_id = %self.id, state = ?ActionState::Pending, "action returned to queue");
        ActionRecord {
            id: self.id,
            request,
            continuation: self.continuation,
            enqueued_at: self.enqueued_at,
            attempts: self.attempts,
        }
    }
}
