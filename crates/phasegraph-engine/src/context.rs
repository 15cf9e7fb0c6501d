use std::collections::BTreeMap;

use phasegraph_core::types::TransitionRecord;

use crate::graph::Transition;
use crate::phase::Phase;

/// Accumulated per-session state across all phases.
///
/// The base fields are owned by the engine; `state` holds the agent's
/// domain fields. Visit counts are keyed by phase name so the context can be
/// persisted as plain data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseContext<S> {
    phase_visits: BTreeMap<String, u32>,
    transition_history: Vec<TransitionRecord>,
    /// Condition name of the backward transition that led here, if any.
    pub backward_trigger: Option<String>,
    /// Free-form explanation supplied by phase logic for the trigger.
    pub backward_trigger_detail: Option<String>,
    awaiting_user_input: bool,
    /// Agent-specific domain state.
    pub state: S,
}

impl<S> PhaseContext<S> {
    pub fn new(state: S) -> Self {
        Self {
            phase_visits: BTreeMap::new(),
            transition_history: Vec::new(),
            backward_trigger: None,
            backward_trigger_detail: None,
            awaiting_user_input: false,
            state,
        }
    }

    pub(crate) fn from_parts(
        phase_visits: BTreeMap<String, u32>,
        transition_history: Vec<TransitionRecord>,
        backward_trigger: Option<String>,
        backward_trigger_detail: Option<String>,
        awaiting_user_input: bool,
        state: S,
    ) -> Self {
        Self {
            phase_visits,
            transition_history,
            backward_trigger,
            backward_trigger_detail,
            awaiting_user_input,
            state,
        }
    }

    /// Number of times `phase` has been entered (0 if never).
    pub fn visit_count<P: Phase>(&self, phase: P) -> u32 {
        self.phase_visits.get(phase.name()).copied().unwrap_or(0)
    }

    pub fn phase_visits(&self) -> &BTreeMap<String, u32> {
        &self.phase_visits
    }

    pub fn transition_history(&self) -> &[TransitionRecord] {
        &self.transition_history
    }

    pub fn awaiting_user_input(&self) -> bool {
        self.awaiting_user_input
    }

    /// Latch the context: no transition is taken until the next message.
    pub fn await_user_input(&mut self) {
        self.awaiting_user_input = true;
    }

    /// Only the arrival of a new message clears the latch.
    pub(crate) fn clear_awaiting_input(&mut self) {
        self.awaiting_user_input = false;
    }

    /// Attach an explanation to the current backward trigger.
    pub fn set_backward_detail(&mut self, detail: impl Into<String>) {
        self.backward_trigger_detail = Some(detail.into());
    }

    pub(crate) fn increment_visit<P: Phase>(&mut self, phase: P) -> u32 {
        let count = self.phase_visits.entry(phase.name().to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Append a history record and update the backward trigger.
    ///
    /// A backward transition stores its condition name as the trigger; a
    /// forward one clears both trigger fields.
    pub(crate) fn record_transition<P: Phase>(&mut self, transition: &Transition<P>) {
        self.transition_history.push(TransitionRecord::new(
            transition.from.name(),
            transition.to.name(),
            transition.condition.clone(),
            transition.is_backward,
        ));

        if transition.is_backward {
            self.backward_trigger = Some(transition.condition.clone());
        } else {
            self.backward_trigger = None;
            self.backward_trigger_detail = None;
        }
    }
}
