use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use phasegraph_core::config::EngineConfig;
use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::event::EventSink;
use phasegraph_core::types::{DisplayEvent, PersistedState};

use crate::agent::{Agent, TurnContext, Visit};
use crate::checkpoint::{CheckpointGate, CheckpointHandler};
use crate::context::PhaseContext;
use crate::evaluator::Decision;
use crate::graph::PhaseGraph;
use crate::phase::Phase;
use crate::serializer;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome<P> {
    /// The current phase is waiting for the next message.
    AwaitingInput { phase: P, transitions: usize },
    /// The terminal phase was reached.
    Complete { transitions: usize },
}

impl<P> TurnOutcome<P> {
    pub fn is_complete(&self) -> bool {
        matches!(self, TurnOutcome::Complete { .. })
    }

    /// Transitions taken during the turn.
    pub fn transitions(&self) -> usize {
        match self {
            TurnOutcome::AwaitingInput { transitions, .. }
            | TurnOutcome::Complete { transitions } => *transitions,
        }
    }
}

/// Drives one session of an agent through its phase graph.
///
/// An engine is built fresh for each turn, either from scratch with
/// [`PhaseEngine::initialize`] or from a snapshot with
/// [`PhaseEngine::restore`], and persisted with [`PhaseEngine::get_state`].
pub struct PhaseEngine<A: Agent> {
    agent: Arc<A>,
    graph: Arc<PhaseGraph<A::Phase, A::State>>,
    current_phase: A::Phase,
    context: PhaseContext<A::State>,
    gate: CheckpointGate,
    config: EngineConfig,
}

impl<A: Agent> PhaseEngine<A> {
    /// Start a new session in the initial phase.
    pub fn initialize(agent: Arc<A>, initial_input: &str, config: EngineConfig) -> Result<Self> {
        let graph = Arc::new(agent.build_graph()?);
        let mut context = PhaseContext::new(agent.create_state(initial_input));
        let initial = graph.initial();
        context.increment_visit(initial);

        info!(agent = agent.agent_type(), phase = initial.name(), "Initialized session");
        Ok(Self::from_parts(agent, graph, initial, context, config))
    }

    /// Resume a session from persisted state.
    pub fn restore(agent: Arc<A>, persisted: PersistedState, config: EngineConfig) -> Result<Self> {
        let graph = Arc::new(agent.build_graph()?);
        let (phase, context) = serializer::from_persisted(agent.agent_type(), &graph, persisted)?;

        debug!(
            agent = agent.agent_type(),
            phase = phase.name(),
            transitions = context.transition_history().len(),
            "Restored session"
        );
        Ok(Self::from_parts(agent, graph, phase, context, config))
    }

    fn from_parts(
        agent: Arc<A>,
        graph: Arc<PhaseGraph<A::Phase, A::State>>,
        current_phase: A::Phase,
        context: PhaseContext<A::State>,
        config: EngineConfig,
    ) -> Self {
        let gate = CheckpointGate::new(None, Duration::from_secs(config.checkpoint_timeout_secs));
        Self {
            agent,
            graph,
            current_phase,
            context,
            gate,
            config,
        }
    }

    /// Route raised checkpoints to `handler` instead of auto-approving.
    pub fn with_checkpoint_handler(mut self, handler: Arc<dyn CheckpointHandler>) -> Self {
        self.gate.set_handler(handler);
        self
    }

    pub fn current_phase(&self) -> A::Phase {
        self.current_phase
    }

    pub fn context(&self) -> &PhaseContext<A::State> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PhaseContext<A::State> {
        &mut self.context
    }

    pub fn graph(&self) -> &PhaseGraph<A::Phase, A::State> {
        &self.graph
    }

    pub fn is_complete(&self) -> bool {
        self.current_phase == self.graph.terminal()
    }

    /// Evaluate transitions out of the current phase without taking one.
    pub fn evaluate(&self) -> Result<(A::Phase, Option<String>)> {
        let decision = self.graph.evaluate(self.current_phase, &self.context)?;
        Ok((
            decision.next_phase(self.current_phase),
            decision.reason().map(str::to_string),
        ))
    }

    /// Run one turn: execute phases and follow transitions until a phase
    /// waits for input or the terminal phase is reached.
    pub async fn process_message(
        &mut self,
        message: &str,
        ui_context: &serde_json::Value,
        events: &EventSink,
    ) -> Result<TurnOutcome<A::Phase>> {
        let graph = Arc::clone(&self.graph);
        let mut transitions = 0usize;
        let mut step = 0usize;

        // A new message is the only thing that releases the latch
        self.context.clear_awaiting_input();

        loop {
            let phase = self.current_phase;

            if phase == graph.terminal() {
                let summary = self.agent.completion_summary(&self.context);
                info!(agent = self.agent.agent_type(), transitions, "Session complete");
                events.emit(DisplayEvent::complete(summary));
                return Ok(TurnOutcome::Complete { transitions });
            }

            let count = self.context.visit_count(phase);
            if count == 0 {
                return Err(PhaseGraphError::InvariantViolation(format!(
                    "phase '{}' is current but was never entered",
                    phase.name()
                )));
            }

            let visit = Visit::new(count, self.context.backward_trigger.clone());
            if visit.is_reentry {
                events.emit(DisplayEvent::thinking(reentry_notice(
                    phase.name(),
                    visit.backward_trigger.as_deref(),
                )));
            }

            self.run_phase(phase, message, ui_context, visit, step, events)
                .await?;
            step += 1;

            match graph.evaluate(phase, &self.context)? {
                Decision::Stay => {
                    let prompt = self.agent.awaiting_prompt(phase, &self.context);
                    debug!(phase = phase.name(), transitions, "Awaiting input");
                    events.emit(DisplayEvent::AwaitingInput {
                        prompt,
                        phase: phase.name().to_string(),
                    });
                    return Ok(TurnOutcome::AwaitingInput { phase, transitions });
                }
                Decision::Advance(transition) => {
                    self.context.record_transition(transition);
                    info!(
                        from = transition.from.name(),
                        to = transition.to.name(),
                        backward = transition.is_backward,
                        reason = %transition.condition,
                        "Phase transition"
                    );
                    events.emit(DisplayEvent::PhaseChanged {
                        from: transition.from.name().to_string(),
                        to: transition.to.name().to_string(),
                        is_backward: transition.is_backward,
                        reason: Some(transition.condition.clone()),
                    });

                    self.current_phase = transition.to;
                    self.context.increment_visit(transition.to);
                    transitions += 1;

                    if transitions > self.config.max_transitions_per_turn {
                        warn!(
                            limit = self.config.max_transitions_per_turn,
                            phase = transition.to.name(),
                            "Transition limit exceeded, stopping turn"
                        );
                        return Err(PhaseGraphError::TransitionLimitExceeded {
                            limit: self.config.max_transitions_per_turn,
                            phase: transition.to.name().to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Execute one phase and resolve any checkpoint it raised.
    async fn run_phase(
        &mut self,
        phase: A::Phase,
        message: &str,
        ui_context: &serde_json::Value,
        visit: Visit,
        step: usize,
        events: &EventSink,
    ) -> Result<()> {
        let snapshot = self
            .config
            .rollback_on_failure
            .then(|| self.context.clone());

        let result = self
            .execute_phase(phase, message, ui_context, visit, step, events)
            .await;

        if let Err(ref e) = result {
            warn!(phase = phase.name(), error = %e, "Phase execution failed");
            if let Some(snapshot) = snapshot {
                debug!(phase = phase.name(), "Rolling back context");
                self.context = snapshot;
            }
        }
        result
    }

    async fn execute_phase(
        &mut self,
        phase: A::Phase,
        message: &str,
        ui_context: &serde_json::Value,
        visit: Visit,
        step: usize,
        events: &EventSink,
    ) -> Result<()> {
        let agent = Arc::clone(&self.agent);
        let behavior = agent.select_behavior(phase, &visit, &self.context);
        debug!(phase = phase.name(), visit = visit.count, ?behavior, "Executing phase");

        let checkpoint = {
            let mut turn = TurnContext::<A>::new(
                phase,
                message,
                ui_context,
                visit,
                step,
                behavior,
                &mut self.context,
                events,
            );
            agent.execute(&mut turn).await?;
            turn.take_checkpoint()
        };

        if let Some(checkpoint) = checkpoint {
            let response = self
                .gate
                .request_approval(&checkpoint, self.context.awaiting_user_input(), events)
                .await?;
            if let Some(response) = response {
                agent.on_checkpoint(phase, &checkpoint, &response, &mut self.context);
            }
        }

        Ok(())
    }

    /// Snapshot the session for persistence.
    pub fn get_state(&self) -> Result<PersistedState> {
        serializer::to_persisted(self.agent.agent_type(), self.current_phase, &self.context)
    }
}

fn reentry_notice(phase: &str, trigger: Option<&str>) -> String {
    match trigger {
        Some(trigger) => format!("Re-entering {} because {}", phase, trigger),
        None => format!("Re-entering {}", phase),
    }
}

impl<A: Agent> std::fmt::Debug for PhaseEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEngine")
            .field("agent", &self.agent.agent_type())
            .field("current_phase", &self.current_phase)
            .field("context", &self.context)
            .finish()
    }
}
