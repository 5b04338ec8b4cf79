//! Foreground end of a port: [`PortConnection`] and its controlling [`PortHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bridge::{ApplicationError, BackgroundConnection, DispatchError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::frame::{PortFrame, PARSE_ERROR};

type Reply = oneshot::Sender<Result<Value, DispatchError>>;

/// State shared by the connection, its response reader and its handle.
#[derive(Debug)]
pub(crate) struct PortShared {
    name: String,
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, Reply>>,
}

impl PortShared {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Registers a reply slot, unless the port is already closed.
    fn register(&self, id: u64, reply: Reply) -> Result<(), DispatchError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_connected() {
            return Err(DispatchError::disconnected(format!("port '{}' is closed", self.name)));
        }
        pending.insert(id, reply);
        Ok(())
    }

    fn take(&self, id: u64) -> Option<Reply> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Marks the port closed and fails every outstanding call.
    ///
    /// `connected` is cleared before the pending map is drained so that a
    /// concurrent [`Self::register`] either sees the port closed or has its
    /// slot drained here.
    pub(crate) fn close(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Reply> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, reply)| reply)
            .collect();
        tracing::info!(port = %self.name, failed_calls = drained.len(), reason, "port closed");
        for reply in drained {
            let _ = reply.send(Err(DispatchError::disconnected(reason)));
        }
    }
}

// ---------------------------------------------------------------------------
// PortConnection
// ---------------------------------------------------------------------------

/// Foreground end of a port. Install it with
/// [`bridge::ActionQueueService::set_background_connection`].
#[derive(Debug)]
pub struct PortConnection {
    shared: Arc<PortShared>,
    outbound: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
}

impl PortConnection {
    pub(crate) fn new(shared: Arc<PortShared>, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            shared,
            outbound,
            next_id: AtomicU64::new(1),
        }
    }

    /// Name given to the port when it was opened.
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

#[async_trait]
impl BackgroundConnection for PortConnection {
    fn is_ready(&self) -> bool {
        self.shared.is_connected()
    }

    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = PortFrame::Request {
            id,
            method: method.to_string(),
            args: args.to_vec(),
        };
        let text = frame.encode().map_err(|e| {
            DispatchError::Application(ApplicationError::new(e.to_string()).with_code(PARSE_ERROR))
        })?;

        let (reply, receiver) = oneshot::channel();
        self.shared.register(id, reply)?;
        if self.outbound.send(text).is_err() {
            self.shared.take(id);
            self.shared.close("background host stopped reading");
            return Err(DispatchError::disconnected(format!(
                "port '{}' is closed",
                self.shared.name
            )));
        }
        tracing::trace!(port = %self.shared.name, request_id = id, method, "request sent");

        receiver
            .await
            .unwrap_or_else(|_| Err(DispatchError::disconnected("port dropped the reply slot")))
    }
}

// ---------------------------------------------------------------------------
// Response reader
// ---------------------------------------------------------------------------

/// Routes response frames to their waiting calls until the host side closes.
pub(crate) async fn read_responses(
    shared: Arc<PortShared>,
    mut responses: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = responses.recv().await {
        match PortFrame::decode(&text) {
            Ok(PortFrame::Response { id, result }) => match shared.take(id) {
                Some(reply) => {
                    let _ = reply.send(result.map_err(DispatchError::Application));
                }
                None => tracing::debug!(request_id = id, "response for unknown request dropped"),
            },
            Ok(PortFrame::Request { id, .. }) => {
                tracing::warn!(request_id = id, "unexpected request frame on response channel")
            }
            Err(error) => tracing::warn!(%error, "dropping malformed response frame"),
        }
    }
    shared.close("background host closed the port");
}

// ---------------------------------------------------------------------------
// PortHandle
// ---------------------------------------------------------------------------

/// Host-side control over an open port.
///
/// Dropping the handle does not close the port; call [`PortHandle::disconnect`].
#[derive(Debug)]
pub struct PortHandle {
    pub(crate) shared: Arc<PortShared>,
    pub(crate) server: JoinHandle<()>,
    pub(crate) reader: JoinHandle<()>,
}

impl PortHandle {
    /// Simulates the platform terminating the background context: in-progress
    /// handlers are aborted, pending calls fail with
    /// [`DispatchError::Disconnected`] and the connection stops being ready.
    pub fn disconnect(&self) {
        self.server.abort();
        self.reader.abort();
        self.shared.close("background context terminated");
    }

    /// Whether the port is still open.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}
