//! Bypass dispatch for the persistent execution model.
//!
//! Calls are handed to one dispatcher task per service through an unbounded
//! channel. The dispatcher starts each call in arrival order and lets them run
//! concurrently, so the connection sees calls in the order they were
//! submitted even on a multi-threaded runtime. There is no retry.

use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::record::ActionOutcome;
use crate::{ActionRequest, BackgroundError, InstalledConnection};

/// One bypass call: the request, the connection snapshot taken when it was
/// submitted, and where to send the outcome.
pub(crate) struct DirectCall {
    pub(crate) request: ActionRequest,
    pub(crate) installed: Option<InstalledConnection>,
    pub(crate) reply: oneshot::Sender<ActionOutcome>,
}

/// Sending half of the bypass channel. The dispatcher task is spawned on the
/// first submission, so a service can be built outside a runtime.
#[derive(Debug)]
pub(crate) struct DirectDispatcher {
    sender: mpsc::UnboundedSender<DirectCall>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<DirectCall>>>,
}

impl DirectDispatcher {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Hands `call` to the dispatcher. Must be called from within a Tokio runtime.
    ///
    /// If the dispatcher is gone the call's reply slot is dropped, which the
    /// caller observes as [`BackgroundError::Internal`].
    pub(crate) fn submit(&self, call: DirectCall) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            tokio::spawn(run(receiver).instrument(tracing::debug_span!("direct")));
        }
        if self.sender.send(call).is_err() {
            tracing::error!("bypass dispatcher stopped, call dropped");
        }
    }
}

async fn run(mut calls: mpsc::UnboundedReceiver<DirectCall>) {
    let mut running = FuturesUnordered::new();
    loop {
        tokio::select! {
            biased;
            call = calls.recv() => match call {
                Some(call) => running.push(settle(call)),
                None => break,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
        }
    }
    while running.next().await.is_some() {}
    tracing::debug!("bypass dispatcher finished");
}

async fn settle(call: DirectCall) {
    let DirectCall {
        request,
        installed,
        reply,
    } = call;
    let outcome = match installed {
        None => Err(BackgroundError::NotConnected),
        Some(installed) => {
            let attempt = installed.connection.call(&request.method, &request.args);
            match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result.map_err(BackgroundError::from),
                Err(panic) => {
                    let message = if let Some(s) = panic.downcast_ref::<&str>() {
                        format!("connection panicked: {s}")
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        format!("connection panicked: {s}")
                    } else {
                        "connection panicked".to_string()
                    };
                    tracing::error!(method = %request.method, error = %message, "bypass call failed");
                    Err(BackgroundError::Internal { message })
                }
            }
        }
    };
    let _ = reply.send(outcome);
}
