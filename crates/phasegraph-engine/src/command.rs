use serde::de::DeserializeOwned;
use serde_json::json;

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::types::DisplayEvent;

use crate::context::PhaseContext;

/// Result of applying one command to the context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    /// Events to surface to the user (usually `data.*`).
    pub events: Vec<DisplayEvent>,
    /// Set when the command was refused; nothing was applied.
    pub rejection: Option<String>,
}

impl CommandOutcome {
    pub fn applied(events: Vec<DisplayEvent>) -> Self {
        Self {
            events,
            rejection: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            rejection: Some(reason.into()),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.rejection.is_none()
    }
}

/// A typed side-effect requested by the text generator.
///
/// Applying is synchronous and deterministic so the effect of every
/// command can be tested without a model.
pub trait ApplyCommand<S> {
    /// Command names this type can decode.
    fn names() -> &'static [&'static str];

    fn apply(self, context: &mut PhaseContext<S>) -> CommandOutcome;
}

/// Decode a raw `(name, input)` pair into a command enum declared with
/// `#[serde(tag = "name", content = "input")]`.
pub fn decode_command<C: DeserializeOwned>(name: &str, input: &serde_json::Value) -> Result<C> {
    serde_json::from_value(json!({ "name": name, "input": input })).map_err(|e| {
        PhaseGraphError::Generation(format!("malformed command '{name}': {e}"))
    })
}

/// The event emitted when a command is refused.
pub fn rejection_event(name: &str, reason: &str) -> DisplayEvent {
    DisplayEvent::data(
        "command_rejected",
        json!({ "command": name, "reason": reason }),
    )
}
