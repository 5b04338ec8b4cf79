//! Shared fixtures for the action queue integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge::{ApplicationError, BackgroundConnection, DispatchError};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// How the connection answers one call.
pub enum Step {
    /// Reply immediately.
    Reply(Result<Value, DispatchError>),
    /// Report the channel dead and stop being ready.
    Die,
    /// Wait for the test to supply the reply.
    Hold(oneshot::Receiver<Result<Value, DispatchError>>),
    /// Panic inside `call`.
    Panic,
}

/// A [`BackgroundConnection`] whose replies are scripted per method.
///
/// Methods without a script reply `{"method": <name>, "args": [...]}`.
pub struct ScriptedConnection {
    name: &'static str,
    ready: AtomicBool,
    calls: Mutex<Vec<String>>,
    script: Mutex<HashMap<String, VecDeque<Step>>>,
}

impl ScriptedConnection {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            ready: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(HashMap::new()),
        })
    }

    pub fn not_ready(name: &'static str) -> Arc<Self> {
        let conn = Self::new(name);
        conn.set_ready(false);
        conn
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Queues `step` as the next answer for `method`.
    pub fn script(&self, method: &str, step: Step) {
        self.script
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(step);
    }

    /// Scripts a held reply for `method` and returns the sender that releases it.
    pub fn hold(&self, method: &str) -> oneshot::Sender<Result<Value, DispatchError>> {
        let (tx, rx) = oneshot::channel();
        self.script(method, Step::Hold(rx));
        tx
    }

    pub fn fail_with(&self, method: &str, message: &str) {
        self.script(
            method,
            Step::Reply(Err(DispatchError::Application(ApplicationError::new(message)))),
        );
    }

    /// Methods called on this connection, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundConnection for ScriptedConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, DispatchError> {
        self.calls.lock().unwrap().push(method.to_string());
        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);

        match step {
            None => Ok(json!({ "method": method, "args": args })),
            Some(Step::Reply(result)) => result,
            Some(Step::Die) => {
                self.set_ready(false);
                Err(DispatchError::disconnected(format!("{} terminated", self.name)))
            }
            Some(Step::Hold(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(DispatchError::disconnected("hold released"))),
            Some(Step::Panic) => panic!("scripted panic in {method}"),
        }
    }
}

/// Polls `condition` until it holds, failing the test after one second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

/// Returns `true` if `future` has not completed after a short grace period.
pub async fn stays_pending<F: Future>(future: F) -> bool {
    tokio::time::timeout(Duration::from_millis(50), future)
        .await
        .is_err()
}

pub fn echo(method: &str) -> Value {
    json!({ "method": method, "args": [] })
}
