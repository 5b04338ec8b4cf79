//! Background end of a port: method handlers and the request-serving loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge::ApplicationError;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::connection::{read_responses, PortConnection, PortHandle, PortShared};
use crate::frame::{PortFrame, METHOD_NOT_FOUND};

/// A method served by the background context.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, args: Vec<Value>) -> Result<Value, ApplicationError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Result<Value, ApplicationError> + Send + Sync,
{
    async fn handle(&self, args: Vec<Value>) -> Result<Value, ApplicationError> {
        (self.0)(args)
    }
}

/// Registry of background methods. Each [`BackgroundHost::connect`] opens a
/// fresh port served by a snapshot of the registered handlers.
#[derive(Clone, Default)]
pub struct BackgroundHost {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl std::fmt::Debug for BackgroundHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("BackgroundHost")
            .field("methods", &methods)
            .finish()
    }
}

impl BackgroundHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`, replacing any previous one.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: Arc<dyn MethodHandler>,
    ) -> &mut Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Registers a synchronous closure for `method`.
    pub fn register_fn<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ApplicationError> + Send + Sync + 'static,
    {
        self.register(method, Arc::new(FnHandler(handler)))
    }

    /// Opens a port named `name`. Must be called from within a Tokio runtime.
    pub fn connect(&self, name: &str) -> (Arc<PortConnection>, PortHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PortShared::new(name));

        let span = tracing::debug_span!("port", name);
        let server = tokio::spawn(
            serve(self.handlers.clone(), request_rx, response_tx).instrument(span.clone()),
        );
        let reader = tokio::spawn(read_responses(Arc::clone(&shared), response_rx).instrument(span));
        tracing::info!(port = name, "port opened");

        (
            Arc::new(PortConnection::new(Arc::clone(&shared), request_tx)),
            PortHandle {
                shared,
                server,
                reader,
            },
        )
    }
}

/// Serves request frames until the foreground end goes away. Handlers run
/// concurrently; aborting this task aborts them all.
async fn serve(
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    mut requests: mpsc::UnboundedReceiver<String>,
    responses: mpsc::UnboundedSender<String>,
) {
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            text = requests.recv() => {
                let Some(text) = text else { break };
                let (id, method, args) = match PortFrame::decode(&text) {
                    Ok(PortFrame::Request { id, method, args }) => (id, method, args),
                    Ok(PortFrame::Response { id, .. }) => {
                        tracing::warn!(request_id = id, "unexpected response frame on request channel");
                        continue;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "dropping malformed request frame");
                        continue;
                    }
                };
                let handler = handlers.get(&method).cloned();
                let responses = responses.clone();
                running.spawn(async move {
                    let result = match handler {
                        Some(handler) => handler.handle(args).await,
                        None => Err(ApplicationError::new(format!("method '{method}' not found"))
                            .with_code(METHOD_NOT_FOUND)),
                    };
                    tracing::debug!(request_id = id, %method, ok = result.is_ok(), "request handled");
                    match (PortFrame::Response { id, result }).encode() {
                        Ok(text) => {
                            let _ = responses.send(text);
                        }
                        Err(error) => tracing::error!(request_id = id, %error, "response could not be encoded"),
                    }
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(error) = joined {
                    tracing::error!(%error, "request handler failed without answering");
                }
            }
        }
    }

    // Let in-progress handlers finish answering after the request side closes.
    while running.join_next().await.is_some() {}
}
