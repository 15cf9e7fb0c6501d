//! A tutoring agent.
//!
//! The learner agrees on session preferences, approves a plan of
//! objectives, and practices each objective until a streak of correct
//! answers marks it mastered. A missing prerequisite sends the session back
//! to planning; every mastered objective passes through a short review
//! before practice moves on to the next one.
//!
//! ```text
//! configure -> plan -> practice -> review -> complete
//!                ^        |  ^        |
//!                +- gap --+  +- next -+
//! ```

mod commands;
mod prompts;
mod state;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info};

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::traits::TextGenerator;
use phasegraph_core::types::{DisplayEvent, GenerationRequest};
use phasegraph_engine::{
    Agent, Checkpoint, CheckpointResponse, Phase, PhaseContext, PhaseGraph, Transition,
    TurnContext, Visit,
};

pub use commands::TutorCommand;
pub use state::{
    Objective, ObjectiveScore, Pace, Preferences, TutorPhase, TutorState, MASTERY_STREAK,
};

pub const AGENT_TYPE: &str = "tutor";

pub const CONFIGURE_CHECKPOINT: &str = "configure_approval";
pub const PLAN_CHECKPOINT: &str = "plan_approval";

/// What a tutor phase does on a given visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TutorBehavior {
    /// First time through: ask.
    Initial,
    /// A question is out; the message is the learner's answer.
    Resume,
    /// Back again, usually after a backward transition.
    Reentry { trigger: Option<String> },
}

pub struct TutorAgent {
    generator: Arc<dyn TextGenerator>,
}

impl TutorAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn request(&self, prompt: String, user_message: Option<&str>, allowed: &[&str]) -> GenerationRequest {
        GenerationRequest {
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            prompt,
            user_message: user_message.map(str::to_string),
            allowed_commands: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Generate without the learner's message; the tutor is only talking.
    async fn speak(&self, turn: &mut TurnContext<'_, Self>, prompt: String) -> Result<()> {
        let request = self.request(prompt, None, &[]);
        turn.generate::<TutorCommand>(self.generator.as_ref(), request)
            .await?;
        Ok(())
    }

    async fn configure(&self, turn: &mut TurnContext<'_, Self>) -> Result<()> {
        match turn.behavior.clone() {
            TutorBehavior::Resume => {
                let request = self.request(
                    prompts::configure_resume(turn.state()),
                    turn.user_reply(),
                    &[TutorCommand::SET_PREFERENCES],
                );
                turn.generate::<TutorCommand>(self.generator.as_ref(), request)
                    .await?;

                match turn.state().preferences.clone() {
                    Some(preferences) => {
                        let message = match &preferences.style {
                            Some(style) => format!(
                                "Start with a {} pace in a {} style?",
                                preferences.pace, style
                            ),
                            None => format!("Start with a {} pace?", preferences.pace),
                        };
                        turn.raise_checkpoint(
                            Checkpoint::new(CONFIGURE_CHECKPOINT, message)
                                .with_options(vec![
                                    "Ready to begin".into(),
                                    "Adjust preferences".into(),
                                ]),
                        );
                    }
                    None => turn.await_input(),
                }
            }
            behavior => {
                let prompt = match behavior {
                    TutorBehavior::Reentry { .. } => prompts::configure_reentry(turn.state()),
                    _ => prompts::configure_initial(turn.state()),
                };
                self.speak(turn, prompt).await?;
                turn.state_mut().configure.ask();
                turn.await_input();
            }
        }
        Ok(())
    }

    async fn plan(&self, turn: &mut TurnContext<'_, Self>) -> Result<()> {
        match turn.behavior.clone() {
            TutorBehavior::Initial => {
                turn.state_mut().seed_objectives();
                let objectives = turn.state().objectives.clone();
                turn.emit(DisplayEvent::data(
                    "objectives",
                    json!({ "objectives": objectives }),
                ));
                let prompt = prompts::plan_initial(turn.state());
                self.speak(turn, prompt).await?;
                turn.state_mut().plan.ask();
                turn.await_input();
            }
            TutorBehavior::Resume => {
                let request = self.request(
                    prompts::plan_resume(turn.state()),
                    turn.user_reply(),
                    &[
                        TutorCommand::ADD_OBJECTIVE,
                        TutorCommand::DROP_OBJECTIVE,
                        TutorCommand::CONFIRM_PLAN,
                    ],
                );
                turn.generate::<TutorCommand>(self.generator.as_ref(), request)
                    .await?;

                if turn.state().plan_selected {
                    let count = turn.state().objectives.len();
                    turn.raise_checkpoint(
                        Checkpoint::new(
                            PLAN_CHECKPOINT,
                            format!("Start practicing with {} objective(s)?", count),
                        )
                        .with_options(vec!["Proceed with plan".into(), "Adjust objectives".into()]),
                    );
                } else {
                    turn.await_input();
                }
            }
            TutorBehavior::Reentry { trigger } => {
                if let Some(gap) = turn.state_mut().gap.take() {
                    let statement = format!("Prerequisite: {}", gap);
                    let id = turn.state_mut().insert_prerequisite(statement.clone());
                    debug!(objective = %id, "Inserted prerequisite");
                    turn.emit(DisplayEvent::data(
                        "objective_added",
                        json!({ "id": id, "statement": statement, "prerequisite": true }),
                    ));
                }
                let detail = turn.context.backward_trigger_detail.clone();
                let prompt = prompts::plan_reentry(turn.state(), trigger.as_deref(), detail.as_deref());
                self.speak(turn, prompt).await?;
            }
        }
        Ok(())
    }

    async fn practice(&self, turn: &mut TurnContext<'_, Self>) -> Result<()> {
        if turn.state().current_objective().is_none() {
            if let Some(next) = turn.state_mut().select_next().cloned() {
                turn.emit(DisplayEvent::data(
                    "objective_started",
                    json!({ "id": next.id, "statement": next.statement }),
                ));
            }
        }
        let objective = turn
            .state()
            .current_objective()
            .cloned()
            .ok_or_else(|| PhaseGraphError::Executor {
                phase: TutorPhase::Practice.name().to_string(),
                message: "no objective left to practice".to_string(),
            })?;

        match turn.behavior.clone() {
            TutorBehavior::Resume => {
                let streak = turn.state().score(&objective.id).streak;
                let request = self.request(
                    prompts::practice_resume(&objective, streak),
                    turn.user_reply(),
                    &[
                        TutorCommand::RECORD_ANSWER,
                        TutorCommand::FLAG_GAP,
                        TutorCommand::REVISIT_PREFERENCES,
                    ],
                );
                turn.generate::<TutorCommand>(self.generator.as_ref(), request)
                    .await?;

                let state = turn.state_mut();
                state.practice.reset();
                let keep_going =
                    state.gap.is_none() && state.configure.is_confirmed() && !state.is_mastered();
                if keep_going {
                    state.practice.ask();
                    turn.await_input();
                }
            }
            TutorBehavior::Initial | TutorBehavior::Reentry { .. } => {
                let trigger = turn.visit.backward_trigger.clone();
                self.speak(turn, prompts::practice_question(&objective, trigger.as_deref()))
                    .await?;
                turn.state_mut().practice.ask();
                turn.await_input();
            }
        }
        Ok(())
    }

    async fn review(&self, turn: &mut TurnContext<'_, Self>) -> Result<()> {
        let id = turn
            .state_mut()
            .complete_current()
            .ok_or_else(|| PhaseGraphError::Executor {
                phase: TutorPhase::Review.name().to_string(),
                message: "no objective to review".to_string(),
            })?;
        let state = turn.state();
        let score = state.score(&id);
        let objective = state.objective(&id).cloned();
        let remaining = state
            .objectives
            .iter()
            .filter(|o| !state.is_completed(&o.id))
            .count();

        turn.emit(DisplayEvent::data(
            "objective_completed",
            json!({ "id": id, "attempts": score.attempts, "correct": score.correct }),
        ));
        if let Some(objective) = objective {
            self.speak(turn, prompts::review(&objective, remaining)).await?;
        }
        Ok(())
    }
}

impl Agent for TutorAgent {
    type Phase = TutorPhase;
    type State = TutorState;
    type Behavior = TutorBehavior;

    fn agent_type(&self) -> &'static str {
        AGENT_TYPE
    }

    fn build_graph(&self) -> Result<PhaseGraph<TutorPhase, TutorState>> {
        use TutorPhase::*;

        PhaseGraph::builder(Configure, Complete)
            .transitions([
                Transition::forward(Configure, Plan, "preferences_set"),
                Transition::forward(Plan, Practice, "objectives_confirmed"),
                Transition::forward(Practice, Review, "mastery_reached"),
                Transition::backward(Practice, Plan, "objective_gap").with_priority(10),
                Transition::backward(Practice, Configure, "preferences_changed"),
                Transition::forward(Review, Complete, "all_objectives_done"),
                Transition::backward(Review, Practice, "next_objective_available"),
            ])
            .condition("preferences_set", |ctx: &PhaseContext<TutorState>| {
                ctx.state.configure.is_confirmed() && ctx.state.preferences.is_some()
            })
            .condition("objectives_confirmed", |ctx: &PhaseContext<TutorState>| {
                ctx.state.plan.is_confirmed()
                    && !ctx.state.objectives.is_empty()
                    && ctx.state.gap.is_none()
            })
            .condition("mastery_reached", |ctx: &PhaseContext<TutorState>| {
                ctx.state.is_mastered()
            })
            .condition("objective_gap", |ctx: &PhaseContext<TutorState>| {
                ctx.state.gap.is_some()
            })
            .condition("preferences_changed", |ctx: &PhaseContext<TutorState>| {
                !ctx.state.configure.is_confirmed()
            })
            .condition("all_objectives_done", |ctx: &PhaseContext<TutorState>| {
                !ctx.state.has_remaining()
            })
            .condition("next_objective_available", |ctx: &PhaseContext<TutorState>| {
                ctx.state.has_remaining()
            })
            .build()
    }

    fn create_state(&self, initial_input: &str) -> TutorState {
        TutorState::new(initial_input)
    }

    fn select_behavior(
        &self,
        phase: TutorPhase,
        visit: &Visit,
        context: &PhaseContext<TutorState>,
    ) -> TutorBehavior {
        let state = &context.state;
        let reentry = || TutorBehavior::Reentry {
            trigger: visit.backward_trigger.clone(),
        };

        match phase {
            TutorPhase::Configure if state.configure.is_awaiting() => TutorBehavior::Resume,
            TutorPhase::Plan if state.gap.is_some() => reentry(),
            TutorPhase::Plan if visit.is_reentry && state.plan.is_confirmed() => reentry(),
            TutorPhase::Plan if state.plan.is_awaiting() => TutorBehavior::Resume,
            TutorPhase::Practice if state.practice.is_awaiting() => TutorBehavior::Resume,
            TutorPhase::Plan => TutorBehavior::Initial,
            _ if visit.is_reentry => reentry(),
            _ => TutorBehavior::Initial,
        }
    }

    fn execute<'a>(&'a self, turn: &'a mut TurnContext<'_, Self>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            turn.think(format!("Executing {} phase...", turn.phase.name()));
            match turn.phase {
                TutorPhase::Configure => self.configure(turn).await,
                TutorPhase::Plan => self.plan(turn).await,
                TutorPhase::Practice => self.practice(turn).await,
                TutorPhase::Review => self.review(turn).await,
                TutorPhase::Complete => Ok(()),
            }
        })
    }

    fn on_checkpoint(
        &self,
        _phase: TutorPhase,
        checkpoint: &Checkpoint,
        response: &CheckpointResponse,
        context: &mut PhaseContext<TutorState>,
    ) {
        let state = &mut context.state;
        info!(
            checkpoint = %checkpoint.id,
            approved = response.approved,
            action = %response.action,
            "Checkpoint applied"
        );

        match checkpoint.id.as_str() {
            CONFIGURE_CHECKPOINT => {
                let modified = response
                    .modifications
                    .clone()
                    .and_then(|m| serde_json::from_value::<Preferences>(m).ok());
                if response.approved {
                    state.configure.confirm();
                } else if let Some(preferences) = modified {
                    state.preferences = Some(preferences);
                    state.configure.confirm();
                } else {
                    state.preferences = None;
                }
            }
            PLAN_CHECKPOINT => {
                if response.approved {
                    state.plan.confirm();
                } else {
                    state.plan_selected = false;
                }
            }
            _ => {}
        }
    }

    fn awaiting_prompt(&self, phase: TutorPhase, context: &PhaseContext<TutorState>) -> String {
        match phase {
            TutorPhase::Configure if context.state.preferences.is_some() => {
                "Tell me what to change about the session setup.".to_string()
            }
            TutorPhase::Configure => "How would you like this session to run?".to_string(),
            TutorPhase::Plan => "Does this plan work for you? Suggest changes or confirm it.".to_string(),
            TutorPhase::Practice => "Take your time, then send your answer.".to_string(),
            _ => "I'm waiting for your response to continue.".to_string(),
        }
    }

    fn completion_summary(&self, context: &PhaseContext<TutorState>) -> String {
        let state = &context.state;
        format!(
            "Session on {} complete: mastered {} of {} objectives in {} answers.",
            state.topic,
            state.completed.len(),
            state.objectives.len(),
            state.total_attempts()
        )
    }
}
