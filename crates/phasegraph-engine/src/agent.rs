use std::fmt::Debug;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use phasegraph_core::error::Result;
use phasegraph_core::event::EventSink;
use phasegraph_core::types::DisplayEvent;

use crate::checkpoint::{Checkpoint, CheckpointResponse};
use crate::context::PhaseContext;
use crate::graph::PhaseGraph;
use crate::phase::Phase;

/// A concrete conversational agent driven by the phase engine.
///
/// The agent supplies the graph, domain state, and per-phase behavior; the
/// engine owns visit bookkeeping, transition evaluation, and persistence.
pub trait Agent: Send + Sync + 'static {
    type Phase: Phase;
    /// Domain extension of the context. Must serialize as a JSON object.
    type State: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// What a phase should do on a particular visit.
    type Behavior: Debug + Send + Sync;

    /// Stable identifier stored with persisted state.
    fn agent_type(&self) -> &'static str;

    /// Build and validate the transition table.
    fn build_graph(&self) -> Result<PhaseGraph<Self::Phase, Self::State>>;

    /// Fresh domain state for a new session.
    fn create_state(&self, initial_input: &str) -> Self::State;

    /// Pick the behavior for this visit of `phase`.
    fn select_behavior(
        &self,
        phase: Self::Phase,
        visit: &Visit,
        context: &PhaseContext<Self::State>,
    ) -> Self::Behavior;

    /// Run one phase. Events go out through the turn; to end the turn
    /// without transitioning call [`TurnContext::await_input`].
    fn execute<'a>(&'a self, turn: &'a mut TurnContext<'_, Self>) -> BoxFuture<'a, Result<()>>;

    /// Apply a resolved checkpoint to the domain state.
    fn on_checkpoint(
        &self,
        _phase: Self::Phase,
        _checkpoint: &Checkpoint,
        _response: &CheckpointResponse,
        _context: &mut PhaseContext<Self::State>,
    ) {
    }

    /// What the user is asked when a turn ends awaiting input.
    fn awaiting_prompt(&self, _phase: Self::Phase, _context: &PhaseContext<Self::State>) -> String {
        "I'm waiting for your response to continue.".to_string()
    }

    fn completion_summary(&self, _context: &PhaseContext<Self::State>) -> String {
        "Session complete.".to_string()
    }
}

/// Visit information for the phase about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    /// 1 on first entry.
    pub count: u32,
    pub is_reentry: bool,
    /// Condition of the backward transition that led here, if any.
    pub backward_trigger: Option<String>,
}

impl Visit {
    pub fn new(count: u32, backward_trigger: Option<String>) -> Self {
        Self {
            count,
            is_reentry: count > 1,
            backward_trigger,
        }
    }
}

/// Turn-scoped handle given to a phase executor.
pub struct TurnContext<'t, A: Agent + ?Sized> {
    pub phase: A::Phase,
    /// The user's message for this turn.
    pub message: &'t str,
    /// Opaque JSON supplied by the caller alongside the message.
    pub ui_context: &'t serde_json::Value,
    pub visit: Visit,
    /// Phases already executed earlier in this turn. Only step 0 is
    /// answering the user's message.
    pub step: usize,
    pub behavior: A::Behavior,
    pub context: &'t mut PhaseContext<A::State>,
    events: &'t EventSink,
    checkpoint: Option<Checkpoint>,
}

impl<'t, A: Agent + ?Sized> TurnContext<'t, A> {
    pub(crate) fn new(
        phase: A::Phase,
        message: &'t str,
        ui_context: &'t serde_json::Value,
        visit: Visit,
        step: usize,
        behavior: A::Behavior,
        context: &'t mut PhaseContext<A::State>,
        events: &'t EventSink,
    ) -> Self {
        Self {
            phase,
            message,
            ui_context,
            visit,
            step,
            behavior,
            context,
            events,
            checkpoint: None,
        }
    }

    /// The user's message, if this phase is the one it was sent to.
    pub fn user_reply(&self) -> Option<&'t str> {
        (self.step == 0 && !self.message.trim().is_empty()).then_some(self.message)
    }

    pub fn emit(&self, event: DisplayEvent) {
        self.events.emit(event);
    }

    pub fn say(&self, text: impl Into<String>) {
        self.events.emit(DisplayEvent::speaking(text));
    }

    pub fn think(&self, message: impl Into<String>) {
        self.events.emit(DisplayEvent::thinking(message));
    }

    pub fn events(&self) -> &EventSink {
        self.events
    }

    pub fn state(&self) -> &A::State {
        &self.context.state
    }

    pub fn state_mut(&mut self) -> &mut A::State {
        &mut self.context.state
    }

    /// End the turn after this phase without evaluating transitions.
    pub fn await_input(&mut self) {
        self.context.await_user_input();
    }

    /// Raise a checkpoint; the engine resolves it after the phase returns.
    /// A second call replaces the first.
    pub fn raise_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = Some(checkpoint);
    }

    pub(crate) fn take_checkpoint(&mut self) -> Option<Checkpoint> {
        self.checkpoint.take()
    }
}
