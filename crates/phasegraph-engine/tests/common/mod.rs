#![allow(dead_code)]

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_engine::{
    Agent, Checkpoint, CheckpointResponse, Phase, PhaseContext, PhaseGraph, Transition,
    TurnContext, Visit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    A,
    B,
    C,
}

impl Phase for Step {
    fn name(&self) -> &'static str {
        match self {
            Step::A => "a",
            Step::B => "b",
            Step::C => "c",
        }
    }

    fn all() -> &'static [Self] {
        &[Step::A, Step::B, Step::C]
    }
}

/// Domain state of the toy agent. Tests flip the flags directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    pub cond1: bool,
    pub cond2: bool,
    pub gap: bool,
    /// Keep `gap` set when A is re-entered (drives an endless cycle).
    pub sticky_gap: bool,
    /// Phase whose executor latches the turn.
    pub latch_in: Option<String>,
    /// Phase whose executor raises a checkpoint.
    pub checkpoint_in: Option<String>,
    pub approvals: Vec<String>,
    /// `phase:behavior` for every execution, in order.
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Initial,
    Reentry { trigger: Option<String> },
}

/// A -> B -> C with a high-priority backward edge B -> A on "gap".
pub struct Toy;

impl Agent for Toy {
    type Phase = Step;
    type State = Flags;
    type Behavior = Mode;

    fn agent_type(&self) -> &'static str {
        "toy"
    }

    fn build_graph(&self) -> Result<PhaseGraph<Step, Flags>> {
        PhaseGraph::builder(Step::A, Step::C)
            .transition(Transition::forward(Step::A, Step::B, "cond1"))
            .transition(Transition::forward(Step::B, Step::C, "cond2"))
            .transition(Transition::backward(Step::B, Step::A, "gap").with_priority(10))
            .condition("cond1", |ctx: &PhaseContext<Flags>| ctx.state.cond1)
            .condition("cond2", |ctx: &PhaseContext<Flags>| ctx.state.cond2)
            .condition("gap", |ctx: &PhaseContext<Flags>| ctx.state.gap)
            .build()
    }

    fn create_state(&self, _initial_input: &str) -> Flags {
        Flags::default()
    }

    fn select_behavior(&self, _phase: Step, visit: &Visit, _context: &PhaseContext<Flags>) -> Mode {
        if visit.is_reentry {
            Mode::Reentry {
                trigger: visit.backward_trigger.clone(),
            }
        } else {
            Mode::Initial
        }
    }

    fn execute<'a>(&'a self, turn: &'a mut TurnContext<'_, Self>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let phase = turn.phase.name();
            turn.say(format!("in {}", phase));

            let entry = format!("{}:{:?}", phase, turn.behavior);
            turn.state_mut().log.push(entry);

            let reentry = matches!(turn.behavior, Mode::Reentry { .. });
            if turn.phase == Step::A && reentry && !turn.state().sticky_gap {
                turn.state_mut().gap = false;
            }
            if turn.state().checkpoint_in.as_deref() == Some(phase) {
                turn.raise_checkpoint(Checkpoint::new(format!("{}_review", phase), "Continue?"));
            }
            if turn.state().latch_in.as_deref() == Some(phase) {
                turn.await_input();
            }
            Ok(())
        })
    }

    fn on_checkpoint(
        &self,
        _phase: Step,
        checkpoint: &Checkpoint,
        response: &CheckpointResponse,
        context: &mut PhaseContext<Flags>,
    ) {
        if response.approved {
            context.state.approvals.push(checkpoint.id.clone());
        }
    }

    fn awaiting_prompt(&self, phase: Step, _context: &PhaseContext<Flags>) -> String {
        format!("waiting in {}", phase.name())
    }

    fn completion_summary(&self, context: &PhaseContext<Flags>) -> String {
        format!("done after {} transitions", context.transition_history().len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    A,
    B,
    C,
    Done,
}

impl Phase for Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::A => "a",
            Stage::B => "b",
            Stage::C => "c",
            Stage::Done => "done",
        }
    }

    fn all() -> &'static [Self] {
        &[Stage::A, Stage::B, Stage::C, Stage::Done]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scratch {
    pub counter: u32,
    pub note: Option<String>,
}

/// Walks A -> B -> C -> Done unconditionally; C mutates two fields and fails.
pub struct Crashing;

impl Agent for Crashing {
    type Phase = Stage;
    type State = Scratch;
    type Behavior = ();

    fn agent_type(&self) -> &'static str {
        "crashing"
    }

    fn build_graph(&self) -> Result<PhaseGraph<Stage, Scratch>> {
        PhaseGraph::builder(Stage::A, Stage::Done)
            .transition(Transition::forward(Stage::A, Stage::B, "always"))
            .transition(Transition::forward(Stage::B, Stage::C, "always"))
            .transition(Transition::forward(Stage::C, Stage::Done, "always"))
            .condition("always", |_: &PhaseContext<Scratch>| true)
            .build()
    }

    fn create_state(&self, _initial_input: &str) -> Scratch {
        Scratch::default()
    }

    fn select_behavior(&self, _phase: Stage, _visit: &Visit, _context: &PhaseContext<Scratch>) {}

    fn execute<'a>(&'a self, turn: &'a mut TurnContext<'_, Self>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if turn.phase == Stage::C {
                turn.state_mut().counter += 1;
                turn.state_mut().note = Some("half-written".into());
                return Err(PhaseGraphError::Executor {
                    phase: "c".into(),
                    message: "model unavailable".into(),
                });
            }
            Ok(())
        })
    }
}
