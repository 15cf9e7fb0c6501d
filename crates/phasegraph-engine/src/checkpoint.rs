use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::event::EventSink;
use phasegraph_core::types::DisplayEvent;

/// A blocking approval gate raised by a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub message: String,
    #[serde(default = "default_options")]
    pub options: Vec<String>,
    #[serde(default = "default_requires_approval")]
    pub requires_approval: bool,
}

fn default_options() -> Vec<String> {
    vec!["Proceed".into(), "Modify".into(), "Cancel".into()]
}

fn default_requires_approval() -> bool {
    true
}

impl Checkpoint {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            options: default_options(),
            requires_approval: true,
        }
    }

    /// Replace the answer options shown to the user.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Mark the checkpoint informational; it resolves without asking.
    pub fn informational(mut self) -> Self {
        self.requires_approval = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointAction {
    #[default]
    Proceed,
    Modify,
    Cancel,
}

impl std::fmt::Display for CheckpointAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Modify => write!(f, "modify"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Answer to a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub approved: bool,
    #[serde(default)]
    pub action: CheckpointAction,
    #[serde(default)]
    pub modifications: Option<serde_json::Value>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl CheckpointResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            action: CheckpointAction::Proceed,
            modifications: None,
            rejection_reason: None,
        }
    }

    pub fn modify(modifications: serde_json::Value) -> Self {
        Self {
            approved: false,
            action: CheckpointAction::Modify,
            modifications: Some(modifications),
            rejection_reason: None,
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            action: CheckpointAction::Cancel,
            modifications: None,
            rejection_reason: Some(reason.into()),
        }
    }
}

/// External decider for checkpoints (a UI prompt, a remote approver, ...).
///
/// The gate calls `request_approval` before it emits `checkpoint.requested`
/// and only then awaits the returned future. Handlers that track pending
/// checkpoints register them in the call itself, so a consumer reacting to
/// the event can always answer.
pub trait CheckpointHandler: Send + Sync + 'static {
    fn request_approval<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<CheckpointResponse>>;
}

/// Adapts a synchronous closure into a [`CheckpointHandler`].
pub struct CheckpointFn<F>(pub F);

impl<F> CheckpointHandler for CheckpointFn<F>
where
    F: Fn(&Checkpoint) -> CheckpointResponse + Send + Sync + 'static,
{
    fn request_approval<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<CheckpointResponse>> {
        let response = (self.0)(checkpoint);
        Box::pin(async move { Ok(response) })
    }
}

/// Runs raised checkpoints through the configured handler.
pub struct CheckpointGate {
    handler: Option<Arc<dyn CheckpointHandler>>,
    timeout: Duration,
}

impl CheckpointGate {
    pub fn new(handler: Option<Arc<dyn CheckpointHandler>>, timeout: Duration) -> Self {
        Self { handler, timeout }
    }

    pub fn set_handler(&mut self, handler: Arc<dyn CheckpointHandler>) {
        self.handler = Some(handler);
    }

    /// Resolve a checkpoint.
    ///
    /// Returns `None` when the gate is skipped because the context is still
    /// awaiting the user's reply: state the user has not been asked to
    /// confirm is never auto-approved.
    pub async fn request_approval(
        &self,
        checkpoint: &Checkpoint,
        awaiting_user_input: bool,
        events: &EventSink,
    ) -> Result<Option<CheckpointResponse>> {
        if awaiting_user_input {
            debug!(checkpoint = %checkpoint.id, "Awaiting user input, skipping checkpoint");
            return Ok(None);
        }

        let response = match (&self.handler, checkpoint.requires_approval) {
            (Some(handler), true) => {
                let decision = handler.request_approval(checkpoint);
                events.emit(DisplayEvent::CheckpointRequested {
                    id: checkpoint.id.clone(),
                    message: checkpoint.message.clone(),
                    options: checkpoint.options.clone(),
                });
                match tokio::time::timeout(self.timeout, decision).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(checkpoint = %checkpoint.id, "Checkpoint timed out");
                        return Err(PhaseGraphError::CheckpointTimeout {
                            id: checkpoint.id.clone(),
                        });
                    }
                }
            }
            // No handler, or nothing to approve: auto-approve
            _ => CheckpointResponse::approve(),
        };

        info!(
            checkpoint = %checkpoint.id,
            approved = response.approved,
            action = %response.action,
            "Checkpoint resolved"
        );
        events.emit(DisplayEvent::CheckpointResolved {
            id: checkpoint.id.clone(),
            approved: response.approved,
            action: response.action.to_string(),
        });

        Ok(Some(response))
    }
}

impl Default for CheckpointGate {
    fn default() -> Self {
        Self::new(None, Duration::from_secs(300))
    }
}

struct PendingCheckpoint {
    checkpoint: Checkpoint,
    token: u64,
    tx: oneshot::Sender<CheckpointResponse>,
}

/// Manages pending checkpoints with oneshot channels.
///
/// The engine side awaits `request_approval`; the transport side answers
/// with `respond` once the user picks an option. A checkpoint is pending
/// from the moment it is requested until it is answered or its waiter
/// gives up (timeout or cancellation).
#[derive(Default)]
pub struct CheckpointBroker {
    pending: Mutex<HashMap<String, PendingCheckpoint>>,
    next_token: AtomicU64,
}

impl CheckpointBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCheckpoint>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Respond to a pending checkpoint.
    /// Returns true if the checkpoint was found and resolved.
    pub async fn respond(&self, checkpoint_id: &str, response: CheckpointResponse) -> bool {
        let entry = self.lock().remove(checkpoint_id);
        match entry {
            Some(pending) => pending.tx.send(response).is_ok(),
            None => false,
        }
    }

    /// List all pending checkpoints.
    pub async fn pending_checkpoints(&self) -> Vec<Checkpoint> {
        self.lock()
            .values()
            .map(|pending| pending.checkpoint.clone())
            .collect()
    }

    /// Find a pending checkpoint by prefix match on the ID.
    pub async fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        self.lock().keys().find(|key| key.starts_with(prefix)).cloned()
    }
}

/// Removes a broker entry when its waiter finishes or is dropped.
struct Registration<'a> {
    broker: &'a CheckpointBroker,
    id: String,
    token: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.broker.lock();
        // A newer request may have reused the id
        if pending.get(&self.id).is_some_and(|p| p.token == self.token) {
            pending.remove(&self.id);
            debug!(checkpoint = %self.id, "Dropped unanswered checkpoint");
        }
    }
}

impl CheckpointHandler for CheckpointBroker {
    fn request_approval<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<CheckpointResponse>> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let replaced = self.lock().insert(
            checkpoint.id.clone(),
            PendingCheckpoint {
                checkpoint: checkpoint.clone(),
                token,
                tx,
            },
        );
        if replaced.is_some() {
            warn!(checkpoint = %checkpoint.id, "Replaced a pending checkpoint with the same id");
        }
        let registration = Registration {
            broker: self,
            id: checkpoint.id.clone(),
            token,
        };

        Box::pin(async move {
            let _registration = registration;
            rx.await.map_err(|_| PhaseGraphError::CheckpointCancelled {
                id: checkpoint.id.clone(),
            })
        })
    }
}
