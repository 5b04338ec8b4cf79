//! Demo scenario: a wallet popup talking to a background context that the
//! platform suspends and restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bridge::{
    ActionId, ActionOutcome, ActionQueueService, ActionState, ApplicationError, BridgeConfig,
    ExecutionModel, PendingAction,
};
use port::{BackgroundHost, MethodHandler};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

const PASSWORD: &str = "correct horse";
const SIGNING_DELAY: Duration = Duration::from_millis(150);
const STATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything observed while running the scenario.
#[derive(Debug, Serialize)]
pub struct Report {
    pub execution_model: ExecutionModel,
    pub steps: Vec<StepOutcome>,
}

#[derive(Debug, Serialize)]
pub struct StepOutcome {
    pub label: String,
    pub method: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Resolved { value: Value },
    Rejected { error: String },
}

impl From<ActionOutcome> for Outcome {
    fn from(outcome: ActionOutcome) -> Self {
        match outcome {
            Ok(value) => Self::Resolved { value },
            Err(error) => Self::Rejected {
                error: error.to_string(),
            },
        }
    }
}

impl Report {
    fn new(execution_model: ExecutionModel) -> Self {
        Self {
            execution_model,
            steps: Vec::new(),
        }
    }

    async fn record(&mut self, label: &str, method: &str, pending: PendingAction) {
        let outcome = Outcome::from(pending.await);
        tracing::info!(label, method, ?outcome, "call settled");
        self.steps.push(StepOutcome {
            label: label.to_string(),
            method: method.to_string(),
            outcome,
        });
    }
}

/// Slow signing, long enough for the background to be killed mid-call.
/// `started` is notified once the request has reached the handler.
struct SignMessage {
    started: Arc<Notify>,
}

#[async_trait]
impl MethodHandler for SignMessage {
    async fn handle(&self, args: Vec<Value>) -> Result<Value, ApplicationError> {
        self.started.notify_one();
        tokio::time::sleep(SIGNING_DELAY).await;
        let message = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(json!({ "signature": format!("0x{:x}", message.len() * 0x1f) }))
    }
}

/// Background methods. Transactions are keyed by action id, so a retried
/// submission is recorded once no matter how many ports it was sent on.
fn wallet_host(signing_started: Arc<Notify>) -> BackgroundHost {
    let transactions: Arc<Mutex<HashMap<String, u64>>> = Arc::default();
    let next_tx = Arc::new(AtomicU64::new(1));

    let mut host = BackgroundHost::new();
    host.register_fn("getState", |_| Ok(json!({ "isUnlocked": true, "accounts": 2 })))
        .register_fn("verifyPassword", |args| match args.first().and_then(Value::as_str) {
            Some(PASSWORD) => Ok(json!(true)),
            _ => Err(ApplicationError::new("Incorrect password").with_code(-32000)),
        })
        .register_fn("addUnapprovedTransaction", move |args| {
            let action_id = args
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| ApplicationError::new("missing action id"))?
                .to_string();
            let mut transactions = transactions.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = *transactions
                .entry(action_id.clone())
                .or_insert_with(|| next_tx.fetch_add(1, Ordering::SeqCst));
            Ok(json!({ "txId": tx, "actionId": action_id }))
        })
        .register(
            "signMessage",
            Arc::new(SignMessage {
                started: signing_started,
            }),
        );
    host
}

async fn wait_for_state(
    service: &ActionQueueService,
    id: &ActionId,
    state: ActionState,
) -> anyhow::Result<()> {
    let reached = tokio::time::timeout(STATE_TIMEOUT, async {
        while service.status(id) != Some(state) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    if reached.is_err() {
        bail!("action {id} did not reach {state:?} within {STATE_TIMEOUT:?}");
    }
    Ok(())
}

/// Runs the scenario matching `config.execution_model`.
pub async fn run(config: BridgeConfig, backlog: usize) -> anyhow::Result<Report> {
    let service = ActionQueueService::new(config);
    let signing_started = Arc::new(Notify::new());
    let host = wallet_host(Arc::clone(&signing_started));
    match service.execution_model() {
        ExecutionModel::Suspendable => run_suspendable(&service, &host, backlog).await,
        ExecutionModel::Persistent => run_persistent(&service, &host, &signing_started).await,
    }
}

#[tracing::instrument(skip_all, fields(backlog = backlog))]
async fn run_suspendable(
    service: &ActionQueueService,
    host: &BackgroundHost,
    backlog: usize,
) -> anyhow::Result<Report> {
    let mut report = Report::new(ExecutionModel::Suspendable);

    // 1. Popup opens before the background has started.
    let mut queued = Vec::with_capacity(backlog);
    for n in 0..backlog {
        let id = ActionQueueService::generate_action_id();
        let args = vec![json!({ "to": "0xabc", "value": n }), json!(id.as_str())];
        let pending = service.submit_request_to_background("addUnapprovedTransaction", args.clone(), Some(id.clone()));
        if n == 0 {
            // Re-submitting the same id while it waits is ignored.
            drop(service.submit_request_to_background("addUnapprovedTransaction", args, Some(id)));
        }
        queued.push(pending);
    }
    tracing::info!(pending = service.pending_count(), "backlog queued while suspended");

    let (first, first_port) = host.connect("popup-1");
    service.set_background_connection(first);
    for pending in queued {
        report.record("backlog", "addUnapprovedTransaction", pending).await;
    }

    // 2. An application error does not hold up the next call.
    let wrong = service.submit_request_to_background("verifyPassword", vec![json!("hunter2")], None);
    let state = service.submit_request_to_background("getState", vec![], None);
    report.record("wrong-password", "verifyPassword", wrong).await;
    report.record("after-error", "getState", state).await;

    // 3. The platform terminates the background while a signature is in flight.
    let sign_id = ActionQueueService::generate_action_id();
    let sign = service.submit_request_to_background("signMessage", vec![json!("hello")], Some(sign_id.clone()));
    wait_for_state(service, &sign_id, ActionState::InFlight).await?;
    first_port.disconnect();
    wait_for_state(service, &sign_id, ActionState::Pending).await?;
    let state = service.submit_request_to_background("getState", vec![], None);

    let (second, second_port) = host.connect("popup-2");
    service.set_background_connection(second);
    report.record("retried-after-restart", "signMessage", sign).await;
    report.record("queued-during-restart", "getState", state).await;

    // 4. The popup closes with calls still waiting.
    second_port.disconnect();
    let abandoned = [
        service.submit_request_to_background("getState", vec![], None),
        service.submit_request_to_background("verifyPassword", vec![json!(PASSWORD)], None),
    ];
    let dropped = service.drop_queue(false);
    tracing::info!(dropped, "queue dropped on close");
    let [state, unlock] = abandoned;
    report.record("dropped-on-close", "getState", state).await;
    report.record("dropped-on-close", "verifyPassword", unlock).await;

    Ok(report)
}

#[tracing::instrument(skip_all)]
async fn run_persistent(
    service: &ActionQueueService,
    host: &BackgroundHost,
    signing_started: &Notify,
) -> anyhow::Result<Report> {
    let mut report = Report::new(ExecutionModel::Persistent);

    // Without a connection there is nothing to wait for.
    let early = service.submit_request_to_background("getState", vec![], None);
    report.record("before-connect", "getState", early).await;

    let (conn, port) = host.connect("background");
    service.set_background_connection(conn);
    let state = service.submit_request_to_background("getState", vec![], None);
    let unlock = service.submit_request_to_background("verifyPassword", vec![json!(PASSWORD)], None);
    report.record("connected", "getState", state).await;
    report.record("connected", "verifyPassword", unlock).await;

    // A lost connection surfaces to the caller instead of being retried.
    let sign = service.submit_request_to_background("signMessage", vec![json!("hello")], None);
    if tokio::time::timeout(STATE_TIMEOUT, signing_started.notified())
        .await
        .is_err()
    {
        bail!("signMessage did not reach the background within {STATE_TIMEOUT:?}");
    }
    port.disconnect();
    report.record("lost-connection", "signMessage", sign).await;

    Ok(report)
}
