use std::sync::Arc;

use tracing::{error, info, warn};

use phasegraph_core::config::EngineConfig;
use phasegraph_core::error::Result;
use phasegraph_core::event::EventSink;
use phasegraph_core::traits::StateStore;
use phasegraph_core::types::{DisplayEvent, PersistedState, SessionId};

use crate::agent::Agent;
use crate::checkpoint::CheckpointHandler;
use crate::engine::{PhaseEngine, TurnOutcome};
use crate::lane::SessionLanes;

/// Runs turns for many sessions of one agent type.
///
/// Each turn holds the session's lane for the whole load, process, persist
/// cycle, so two messages for one session never interleave.
pub struct SessionRunner<A: Agent> {
    agent: Arc<A>,
    store: Arc<dyn StateStore>,
    lanes: SessionLanes,
    config: EngineConfig,
    checkpoint_handler: Option<Arc<dyn CheckpointHandler>>,
}

impl<A: Agent> SessionRunner<A> {
    pub fn new(agent: Arc<A>, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            agent,
            store,
            lanes: SessionLanes::new(),
            config,
            checkpoint_handler: None,
        }
    }

    pub fn with_checkpoint_handler(mut self, handler: Arc<dyn CheckpointHandler>) -> Self {
        self.checkpoint_handler = Some(handler);
        self
    }

    pub fn agent(&self) -> &Arc<A> {
        &self.agent
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn lanes(&self) -> &SessionLanes {
        &self.lanes
    }

    /// Run one turn for `sid`.
    ///
    /// A session without stored state is initialized with `message` as its
    /// initial input. State is persisted after every turn, including a
    /// failed one; a failure is also reported as one `error` event.
    pub async fn run_turn(
        &self,
        sid: &SessionId,
        message: &str,
        ui_context: &serde_json::Value,
        events: &EventSink,
    ) -> Result<TurnOutcome<A::Phase>> {
        let lane = self.lanes.acquire(sid).await;
        let result = self.locked_turn(sid, message, ui_context, events).await;
        drop(lane);
        self.lanes.release(sid);
        result
    }

    async fn locked_turn(
        &self,
        sid: &SessionId,
        message: &str,
        ui_context: &serde_json::Value,
        events: &EventSink,
    ) -> Result<TurnOutcome<A::Phase>> {
        let mut engine = match self.open(sid, message).await {
            Ok(engine) => engine,
            Err(e) => {
                error!(session = %sid, error = %e, "Failed to open session");
                events.emit(DisplayEvent::from_error(&e));
                return Err(e);
            }
        };

        let result = engine.process_message(message, ui_context, events).await;

        // Persist even after a failure so partial progress is not lost
        let saved = match engine.get_state() {
            Ok(state) => self.store.save(sid, &state).await,
            Err(e) => Err(e),
        };

        match (result, saved) {
            (Ok(outcome), Ok(())) => {
                info!(
                    session = %sid,
                    phase = ?engine.current_phase(),
                    transitions = outcome.transitions(),
                    complete = outcome.is_complete(),
                    "Turn finished"
                );
                Ok(outcome)
            }
            (Ok(_), Err(e)) => {
                error!(session = %sid, error = %e, "Failed to persist session state");
                events.emit(DisplayEvent::from_error(&e));
                Err(e)
            }
            (Err(e), saved) => {
                if let Err(save_err) = saved {
                    warn!(session = %sid, error = %save_err, "Failed to persist state after turn error");
                }
                error!(session = %sid, error = %e, code = e.code(), "Turn failed");
                events.emit(DisplayEvent::from_error(&e));
                Err(e)
            }
        }
    }

    async fn open(&self, sid: &SessionId, message: &str) -> Result<PhaseEngine<A>> {
        let engine = match self.store.load(sid).await? {
            Some(state) => PhaseEngine::restore(Arc::clone(&self.agent), state, self.config.clone())?,
            None => {
                info!(session = %sid, agent = self.agent.agent_type(), "Starting new session");
                PhaseEngine::initialize(Arc::clone(&self.agent), message, self.config.clone())?
            }
        };

        Ok(match &self.checkpoint_handler {
            Some(handler) => engine.with_checkpoint_handler(Arc::clone(handler)),
            None => engine,
        })
    }

    /// Persisted state of a session, if it exists.
    pub async fn state(&self, sid: &SessionId) -> Result<Option<PersistedState>> {
        self.store.load(sid).await
    }

    /// Remove a session. Waits for any turn in flight to finish first.
    pub async fn reset(&self, sid: &SessionId) -> Result<bool> {
        let lane = self.lanes.acquire(sid).await;
        let removed = self.store.delete(sid).await;
        drop(lane);
        self.lanes.release(sid);

        let removed = removed?;
        if removed {
            info!(session = %sid, "Session reset");
        }
        Ok(removed)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionId>> {
        self.store.list().await
    }
}
