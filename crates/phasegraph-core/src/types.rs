use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PhaseGraphError;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event shown to the user while a turn runs.
///
/// The engine produces the lifecycle variants itself; phase executors add
/// `Speaking`, `Thinking`, and free-form `Data` events.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    /// Status line, not part of the conversation.
    Thinking { message: String },
    /// A chunk of streamed assistant text.
    Speaking { delta: String },
    /// The engine moved between phases.
    PhaseChanged {
        from: String,
        to: String,
        is_backward: bool,
        reason: Option<String>,
    },
    /// The turn ended because the current phase is waiting for a reply.
    AwaitingInput { prompt: String, phase: String },
    /// The terminal phase was reached.
    Complete { summary: String },
    /// A checkpoint is waiting for approval.
    CheckpointRequested {
        id: String,
        message: String,
        options: Vec<String>,
    },
    /// A checkpoint was answered (or auto-approved).
    CheckpointResolved {
        id: String,
        approved: bool,
        action: String,
    },
    /// The turn failed.
    Error { code: String, message: String },
    /// Domain event emitted by an agent; `kind` becomes `data.<kind>`.
    Data {
        kind: String,
        payload: serde_json::Value,
    },
}

impl DisplayEvent {
    pub fn thinking(message: impl Into<String>) -> Self {
        Self::Thinking {
            message: message.into(),
        }
    }

    pub fn speaking(delta: impl Into<String>) -> Self {
        Self::Speaking {
            delta: delta.into(),
        }
    }

    pub fn complete(summary: impl Into<String>) -> Self {
        Self::Complete {
            summary: summary.into(),
        }
    }

    pub fn data(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Data {
            kind: kind.into(),
            payload,
        }
    }

    /// Build the user-facing error event for a failed turn.
    pub fn from_error(err: &PhaseGraphError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Event type as it appears on the wire.
    pub fn event_type(&self) -> String {
        match self {
            Self::Thinking { .. } => "agent.thinking".to_string(),
            Self::Speaking { .. } => "agent.speaking".to_string(),
            Self::PhaseChanged { .. } => "phase.changed".to_string(),
            Self::AwaitingInput { .. } => "agent.awaiting_input".to_string(),
            Self::Complete { .. } => "agent.complete".to_string(),
            Self::CheckpointRequested { .. } => "checkpoint.requested".to_string(),
            Self::CheckpointResolved { .. } => "checkpoint.resolved".to_string(),
            Self::Error { .. } => "error".to_string(),
            Self::Data { kind, .. } => format!("data.{}", kind),
        }
    }

    /// Event payload as it appears on the wire (camelCase keys).
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Thinking { message } => json!({ "message": message }),
            Self::Speaking { delta } => json!({ "delta": delta }),
            Self::PhaseChanged {
                from,
                to,
                is_backward,
                reason,
            } => json!({
                "fromPhase": from,
                "toPhase": to,
                "isBackward": is_backward,
                "reason": reason,
            }),
            Self::AwaitingInput { prompt, phase } => json!({ "prompt": prompt, "phase": phase }),
            Self::Complete { summary } => json!({ "summary": summary }),
            Self::CheckpointRequested {
                id,
                message,
                options,
            } => json!({ "id": id, "message": message, "options": options }),
            Self::CheckpointResolved {
                id,
                approved,
                action,
            } => json!({ "id": id, "approved": approved, "action": action }),
            Self::Error { code, message } => json!({ "code": code, "message": message }),
            Self::Data { payload, .. } => payload.clone(),
        }
    }

    /// Stamp the event for delivery.
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            event_type: self.event_type(),
            timestamp: Utc::now(),
            payload: self.payload(),
        }
    }
}

/// Serialized form of a [`DisplayEvent`] handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// One taken transition. Never mutated or pruned once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from_phase: String,
    pub to_phase: String,
    pub reason: String,
    pub is_backward: bool,
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(
        from_phase: impl Into<String>,
        to_phase: impl Into<String>,
        reason: impl Into<String>,
        is_backward: bool,
    ) -> Self {
        Self {
            from_phase: from_phase.into(),
            to_phase: to_phase.into(),
            reason: reason.into(),
            is_backward,
            timestamp: Utc::now(),
        }
    }
}

pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// Plain, storage-agnostic snapshot of an engine between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub agent_type: String,
    pub current_phase: String,
    /// Base context fields flattened together with the agent's domain fields.
    #[serde(default)]
    pub phase_context: serde_json::Value,
    #[serde(default)]
    pub transition_history: Vec<TransitionRecord>,
}

/// Request handed to the text-generation collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// The learner's latest message, when the phase is answering one.
    #[serde(default)]
    pub user_message: Option<String>,
    /// Command names the collaborator may emit during this phase.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

/// A streaming delta from the text-generation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationDelta {
    /// A chunk of text to show the user.
    Text(String),
    /// A chunk of reasoning/status text.
    Thinking(String),
    /// A structured side-effect request.
    Command {
        name: String,
        input: serde_json::Value,
    },
    /// Generation finished.
    Done,
}
