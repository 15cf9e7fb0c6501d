use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A named stage in an agent's workflow graph.
///
/// Implemented by a closed enum per agent type. `name()` is the stable
/// identifier used in persisted state and events, so renaming a variant's
/// name is a breaking change for stored sessions.
pub trait Phase: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Stable snake_case identifier.
    fn name(&self) -> &'static str;

    /// Every phase of this agent type, in declaration order.
    fn all() -> &'static [Self];

    /// Resolve a persisted name back to a phase.
    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.name() == name)
    }
}

/// Explicit sub-state for an interactive phase.
///
/// Replaces pairs of booleans such as "asked" / "confirmed", so a phase can
/// never be confirmed without having asked first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseProgress {
    #[default]
    NotStarted,
    AwaitingResponse,
    Confirmed,
}

impl PhaseProgress {
    /// Move to `AwaitingResponse` unless already confirmed.
    pub fn ask(&mut self) {
        if *self != Self::Confirmed {
            *self = Self::AwaitingResponse;
        }
    }

    pub fn confirm(&mut self) {
        *self = Self::Confirmed;
    }

    pub fn reset(&mut self) {
        *self = Self::NotStarted;
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingResponse)
    }
}
