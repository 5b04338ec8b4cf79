//! The queue processor: a single-flight drain loop over the retry queue.
//!
//! # Algorithm
//!
//! While the installed connection reports ready and the queue is non-empty,
//! dequeue the head, dispatch it, and act on the outcome:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | result | resolve, continue |
//! | [`DispatchError::Application`] | reject, continue |
//! | [`DispatchError::Disconnected`] | requeue at front, stop (unless the connection was replaced meanwhile) |
//! | dispatch task failed | log, reject with [`BackgroundError::Internal`], continue |
//!
//! Stopping on a disconnect keeps FIFO intact: nothing behind the failed record
//! may be dispatched while it waits for a retry.
//!
//! # Concurrency
//!
//! The queue, the in-flight id and the `draining` flag share one mutex. The
//! flag is set when a drain task is spawned and cleared inside the same
//! critical section that observes "nothing left to do", so a submission or a
//! reconnect that races with the end of a drain always spawns a fresh one.
//! No lock is held across the awaited dispatch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::Instrument;

use crate::direct::DirectDispatcher;
use crate::{
    ActionId, ActionRecord, ActionRequest, ActionState, BackgroundConnection, BackgroundError,
    ConnectionRegistry, DispatchError, ExecutionModel, RetryQueue,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Mutable queue bookkeeping guarded by [`Shared::state`].
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) queue: RetryQueue,
    /// Id of the record currently dispatched, if any.
    pub(crate) in_flight: Option<ActionId>,
    /// Re-entrancy guard: a drain task is running.
    pub(crate) draining: bool,
}

/// Everything an [`crate::ActionQueueService`] owns.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) execution_model: ExecutionModel,
    pub(crate) registry: ConnectionRegistry,
    /// Bypass dispatcher, used only in the persistent model.
    pub(crate) direct: DirectDispatcher,
    state: Mutex<QueueState>,
}

/// Why [`Shared::enqueue`] did not insert a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Duplicate {
    Queued,
    InFlight,
}

impl Duplicate {
    /// State of the original record the resubmission collided with.
    pub(crate) fn original_state(self) -> ActionState {
        match self {
            Self::Queued => ActionState::Pending,
            Self::InFlight => ActionState::InFlight,
        }
    }
}

impl Shared {
    pub(crate) fn new(execution_model: ExecutionModel) -> Self {
        Self {
            execution_model,
            registry: ConnectionRegistry::new(),
            direct: DirectDispatcher::new(),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `record` and starts a drain if none is running.
    ///
    /// A record whose id is already queued or in flight is dropped without
    /// settling its continuation.
    pub(crate) fn enqueue(self: &Arc<Self>, record: ActionRecord) -> Result<(), Duplicate> {
        let mut state = self.lock_state();
        if state.in_flight.as_ref() == Some(record.id()) {
            tracing::debug!(action_id = %record.id(), "action already in flight, ignoring resubmission");
            return Err(Duplicate::InFlight);
        }
        if let Err(rejected) = state.queue.enqueue(record) {
            tracing::debug!(action_id = %rejected.id(), "action already queued, ignoring resubmission");
            return Err(Duplicate::Queued);
        }
        tracing::debug!(pending = state.queue.len(), "action queued");
        self.spawn_drain_locked(&mut state);
        Ok(())
    }

    /// Starts a drain if none is running and there is work a ready connection
    /// could pick up. Must be called from within a Tokio runtime.
    pub(crate) fn trigger(self: &Arc<Self>) {
        let mut state = self.lock_state();
        self.spawn_drain_locked(&mut state);
    }

    fn spawn_drain_locked(self: &Arc<Self>, state: &mut QueueState) -> bool {
        if state.draining {
            tracing::trace!("drain already in progress");
            return false;
        }
        if state.queue.is_empty() || self.registry.ready().is_none() {
            return false;
        }
        state.draining = true;
        let span = tracing::debug_span!("drain", pending = state.queue.len());
        tokio::spawn(drain(Arc::clone(self)).instrument(span));
        true
    }
}

// ---------------------------------------------------------------------------
// Drain loop
// ---------------------------------------------------------------------------

/// Clears the `draining` flag if the drain task ends abnormally (panic or
/// runtime shutdown). The normal exit path clears the flag itself and disarms
/// the guard.
struct DrainGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl DrainGuard {
    /// Clears the flag under an already-held lock and disarms the guard.
    fn finish(&mut self, state: &mut QueueState) {
        state.draining = false;
        self.armed = false;
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::error!("drain task ended abnormally; releasing drain guard");
            let mut state = self.shared.lock_state();
            state.draining = false;
            state.in_flight = None;
        }
    }
}

/// Result of handing one request to the connection.
enum Dispatched {
    /// The connection answered. The request is handed back for a possible retry.
    Replied(ActionRequest, Result<Value, DispatchError>),
    /// The dispatch task itself failed.
    Faulted(String),
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = DrainGuard {
        shared: Arc::clone(&shared),
        armed: true,
    };

    loop {
        let (in_flight, request, installed) = {
            let mut state = shared.lock_state();
            let Some(installed) = shared.registry.ready() else {
                tracing::debug!(pending = state.queue.len(), "no ready connection, drain paused");
                guard.finish(&mut state);
                return;
            };
            let Some(record) = state.queue.dequeue_front() else {
                tracing::debug!("queue empty, drain finished");
                guard.finish(&mut state);
                return;
            };
            state.in_flight = Some(record.id().clone());
            let (in_flight, request) = record.begin_attempt();
            (in_flight, request, installed)
        };

        tracing::debug!(
            action_id = %in_flight.id(),
            method = %request.method,
            attempt = in_flight.attempts(),
            waited_ms = in_flight.enqueued_at().elapsed_ms(),
            generation = %installed.generation,
            "dispatching action"
        );
        let outcome = dispatch(Arc::clone(&installed.connection), request).await;

        let mut state = shared.lock_state();
        state.in_flight = None;

        match outcome {
            Dispatched::Replied(_, Ok(value)) => {
                drop(state);
                tracing::debug!(action_id = %in_flight.id(), "action resolved");
                in_flight.resolve(value);
            }
            Dispatched::Replied(_, Err(DispatchError::Application(error))) => {
                drop(state);
                tracing::debug!(action_id = %in_flight.id(), error = %error, "action rejected by background");
                in_flight.reject(BackgroundError::Application(error));
            }
            Dispatched::Replied(request, Err(DispatchError::Disconnected { reason })) => {
                let replaced = shared.registry.generation() != installed.generation;
                tracing::warn!(
                    action_id = %in_flight.id(),
                    attempt = in_flight.attempts(),
                    reason = %reason,
                    replaced,
                    "connection lost during dispatch, action requeued at front"
                );
                state.queue.requeue_front(in_flight.into_record(request));
                if !replaced {
                    guard.finish(&mut state);
                    return;
                }
            }
            Dispatched::Faulted(message) => {
                drop(state);
                tracing::error!(
                    action_id = %in_flight.id(),
                    error = %message,
                    "dispatch task failed, rejecting action"
                );
                in_flight.reject(BackgroundError::Internal { message });
            }
        }
    }
}

/// Runs the call on its own task so a panicking connection cannot take the
/// drain loop (and the queue bookkeeping) down with it.
async fn dispatch(connection: Arc<dyn BackgroundConnection>, request: ActionRequest) -> Dispatched {
    let task = tokio::spawn(async move {
        let result = connection.call(&request.method, &request.args).await;
        (request, result)
    });
    match task.await {
        Ok((request, result)) => Dispatched::Replied(request, result),
        Err(join_error) => Dispatched::Faulted(join_error.to_string()),
    }
}
