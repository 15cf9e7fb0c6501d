use tracing::trace;

use phasegraph_core::error::{PhaseGraphError, Result};

use crate::context::PhaseContext;
use crate::graph::{PhaseGraph, Transition};
use crate::phase::Phase;

/// Outcome of evaluating the transitions out of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'g, P> {
    /// No transition fires; the turn ends awaiting input.
    Stay,
    /// Take this transition.
    Advance(&'g Transition<P>),
}

impl<'g, P: Phase> Decision<'g, P> {
    /// Phase the engine should be in after this decision.
    pub fn next_phase(&self, current: P) -> P {
        match self {
            Decision::Stay => current,
            Decision::Advance(t) => t.to,
        }
    }

    /// Condition name that fired, if any.
    pub fn reason(&self) -> Option<&'g str> {
        match self {
            Decision::Stay => None,
            Decision::Advance(t) => Some(t.condition.as_str()),
        }
    }
}

impl<P: Phase, S> PhaseGraph<P, S> {
    /// Select the next transition out of `current`.
    ///
    /// While the context is awaiting user input nothing fires, no matter how
    /// many predicates would hold. Otherwise predicates run in evaluation
    /// order and the first one that holds wins.
    pub fn evaluate(&self, current: P, ctx: &PhaseContext<S>) -> Result<Decision<'_, P>> {
        if !self.contains(current) {
            return Err(PhaseGraphError::InvariantViolation(format!(
                "evaluate called with phase '{}' which is not part of the graph",
                current.name()
            )));
        }

        if ctx.awaiting_user_input() {
            trace!(phase = current.name(), "Awaiting user input, skipping transition evaluation");
            return Ok(Decision::Stay);
        }

        for (transition, predicate) in self.ordered_edges(current) {
            let holds = predicate(ctx);
            trace!(transition = %transition, holds, "Evaluated transition condition");
            if holds {
                return Ok(Decision::Advance(transition));
            }
        }

        Ok(Decision::Stay)
    }
}
