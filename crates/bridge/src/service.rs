//! The public invocation API.
//!
//! [`ActionQueueService`] is the only surface collaborators use. It owns the
//! retry queue, the connection registry and the drain guard; clones share all
//! three. Construct one per process and hand clones to whoever needs to call
//! into the background context.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::direct::DirectCall;
use crate::processor::Shared;
use crate::record::ActionOutcome;
use crate::{
    ActionId, ActionRecord, ActionRequest, ActionState, BackgroundConnection, BackgroundError,
    BridgeConfig, ConnectionGeneration, Continuation, ExecutionModel,
};

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

/// Future returned by [`ActionQueueService::submit_request_to_background`].
///
/// The call is already submitted when this value is created; awaiting it only
/// observes the outcome. Dropping it does not withdraw the call.
///
/// If the action's continuation is discarded without being settled (silent
/// [`ActionQueueService::drop_queue`], or a de-duplicated resubmission) this
/// future never resolves.
#[must_use = "the call is submitted regardless; await the PendingAction to observe its outcome"]
#[derive(Debug)]
pub struct PendingAction {
    inner: PendingInner,
    duplicate_of: Option<ActionState>,
}

#[derive(Debug)]
enum PendingInner {
    Queued(oneshot::Receiver<ActionOutcome>),
    Direct(oneshot::Receiver<ActionOutcome>),
    Abandoned,
}

impl PendingAction {
    /// If this submission was ignored because its id was already queued or in
    /// flight, the state of that earlier record. Such a future never resolves.
    pub fn duplicate_of(&self) -> Option<ActionState> {
        self.duplicate_of
    }
}

impl Future for PendingAction {
    type Output = ActionOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = match &mut this.inner {
            PendingInner::Queued(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(Some(outcome)),
                Poll::Ready(Err(_)) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            PendingInner::Direct(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(Some(outcome)),
                Poll::Ready(Err(_)) => Poll::Ready(Some(Err(BackgroundError::Internal {
                    message: "bypass dispatcher dropped the call".to_string(),
                }))),
                Poll::Pending => Poll::Pending,
            },
            PendingInner::Abandoned => Poll::Pending,
        };

        match polled {
            Poll::Ready(Some(outcome)) => Poll::Ready(outcome),
            Poll::Ready(None) => {
                // Continuation discarded unsettled: stay pending for good.
                this.inner = PendingInner::Abandoned;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// ActionQueueService
// ---------------------------------------------------------------------------

/// Dispatches calls into the background context according to the configured
/// [`ExecutionModel`].
///
/// All methods that dispatch must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ActionQueueService {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ActionQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("ActionQueueService")
            .field("execution_model", &self.shared.execution_model)
            .field("generation", &self.shared.registry.generation())
            .field("pending", &state.queue.len())
            .field("in_flight", &state.in_flight)
            .field("draining", &state.draining)
            .finish()
    }
}

impl ActionQueueService {
    /// Creates a service with an empty queue and no connection.
    pub fn new(config: BridgeConfig) -> Self {
        tracing::debug!(execution_model = %config.execution_model, "action queue service created");
        Self {
            shared: Arc::new(Shared::new(config.execution_model)),
        }
    }

    /// The execution model fixed at construction.
    pub fn execution_model(&self) -> ExecutionModel {
        self.shared.execution_model
    }

    /// Submits a call to the background context.
    ///
    /// Suspendable model: the call is queued under `id` (generated when `None`)
    /// and dispatched in order once a ready connection is installed. Transport
    /// failures are retried; only application errors and cancellation reach
    /// the caller. Resubmitting an id that is still queued or in flight is a
    /// no-op: the duplicate's future never resolves and no second call is made.
    ///
    /// Persistent model: the installed connection is called directly, with no
    /// retry. Calls reach the connection in submission order. `id` is ignored.
    pub fn submit_request_to_background(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        id: Option<ActionId>,
    ) -> PendingAction {
        let request = ActionRequest {
            method: method.into(),
            args,
        };
        if !self.shared.execution_model.requires_queueing() {
            return self.dispatch_direct(request);
        }

        let id = id.unwrap_or_else(ActionId::generate);
        tracing::debug!(action_id = %id, method = %request.method, "submitting action");
        let (continuation, receiver) = Continuation::channel();
        match self
            .shared
            .enqueue(ActionRecord::new(id, request, continuation))
        {
            Ok(()) => PendingAction {
                inner: PendingInner::Queued(receiver),
                duplicate_of: None,
            },
            Err(duplicate) => PendingAction {
                inner: PendingInner::Abandoned,
                duplicate_of: Some(duplicate.original_state()),
            },
        }
    }

    /// Callback form of [`Self::submit_request_to_background`].
    ///
    /// `callback` receives exactly what the returned future of the promise
    /// form would resolve to, on a spawned task. It is never invoked for a
    /// silently dropped or de-duplicated call.
    #[deprecated(note = "use `submit_request_to_background` and await the returned future")]
    pub fn call_background_method<F>(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        callback: F,
        id: Option<ActionId>,
    ) where
        F: FnOnce(ActionOutcome) + Send + 'static,
    {
        let pending = self.submit_request_to_background(method, args, id);
        tokio::spawn(async move { callback(pending.await) });
    }

    /// Produces a fresh [`ActionId`] for callers that want to resubmit
    /// idempotently.
    pub fn generate_action_id() -> ActionId {
        ActionId::generate()
    }

    /// Empties the queue and returns how many records were dropped.
    ///
    /// Unless `silently` is set, each dropped record is rejected with
    /// [`BackgroundError::Cancelled`]. Silently dropped records never settle.
    /// A record currently in flight is not affected.
    pub fn drop_queue(&self, silently: bool) -> usize {
        let dropped = self.shared.lock_state().queue.drain_all();
        let count = dropped.len();
        tracing::info!(count, silently, "dropping queued background actions");
        if !silently {
            for record in dropped {
                record.cancel();
            }
        }
        count
    }

    /// Removes a queued action and rejects it with
    /// [`BackgroundError::Cancelled`]. Returns `false` if the id is not queued;
    /// an action already in flight cannot be cancelled.
    pub fn cancel_action(&self, id: &ActionId) -> bool {
        let Some(record) = self.shared.lock_state().queue.remove(id) else {
            return false;
        };
        tracing::info!(action_id = %id, "queued background action cancelled");
        record.cancel();
        true
    }

    /// Installs `connection` in place of any previous one and, in the
    /// suspendable model, starts draining whatever accumulated meanwhile.
    ///
    /// Calls already in flight keep using the connection they were dispatched on.
    pub fn set_background_connection(
        &self,
        connection: Arc<dyn BackgroundConnection>,
    ) -> ConnectionGeneration {
        let generation = self.shared.registry.install(connection);
        tracing::info!(%generation, "background connection installed");
        if self.shared.execution_model.requires_queueing() {
            self.shared.trigger();
        }
        generation
    }

    /// Removes the installed connection. Queued calls keep waiting for the
    /// next [`Self::set_background_connection`].
    pub fn clear_background_connection(&self) {
        if let Some(previous) = self.shared.registry.clear() {
            tracing::info!(generation = %previous.generation, "background connection cleared");
        }
    }

    /// Starts a drain if the installed connection is ready and work is queued.
    ///
    /// For transports whose readiness can return without a reinstall.
    pub fn process_queue(&self) {
        if self.shared.execution_model.requires_queueing() {
            self.shared.trigger();
        }
    }

    /// Number of records waiting in the queue (the in-flight one excluded).
    pub fn pending_count(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Ids of the queued records in dispatch order.
    pub fn pending_ids(&self) -> Vec<ActionId> {
        self.shared.lock_state().queue.ids()
    }

    /// Current state of the action with the given id, or `None` if it is
    /// neither queued nor in flight.
    pub fn status(&self, id: &ActionId) -> Option<ActionState> {
        let state = self.shared.lock_state();
        if state.in_flight.as_ref() == Some(id) {
            Some(ActionState::InFlight)
        } else if state.queue.contains(id) {
            Some(ActionState::Pending)
        } else {
            None
        }
    }

    /// Whether a drain loop is currently running.
    pub fn is_draining(&self) -> bool {
        self.shared.lock_state().draining
    }

    fn dispatch_direct(&self, request: ActionRequest) -> PendingAction {
        let installed = self.shared.registry.current();
        tracing::debug!(method = %request.method, "dispatching directly");
        let (reply, receiver) = oneshot::channel();
        self.shared.direct.submit(DirectCall {
            request,
            installed,
            reply,
        });
        PendingAction {
            inner: PendingInner::Direct(receiver),
            duplicate_of: None,
        }
    }
}
