use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use phasegraph_engine::{Phase, PhaseProgress};

/// Consecutive correct answers needed before an objective counts as mastered.
pub const MASTERY_STREAK: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TutorPhase {
    Configure,
    Plan,
    Practice,
    Review,
    Complete,
}

impl Phase for TutorPhase {
    fn name(&self) -> &'static str {
        match self {
            TutorPhase::Configure => "configure",
            TutorPhase::Plan => "plan",
            TutorPhase::Practice => "practice",
            TutorPhase::Review => "review",
            TutorPhase::Complete => "complete",
        }
    }

    fn all() -> &'static [Self] {
        &[
            TutorPhase::Configure,
            TutorPhase::Plan,
            TutorPhase::Practice,
            TutorPhase::Review,
            TutorPhase::Complete,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Relaxed,
    #[default]
    Steady,
    Intensive,
}

impl std::fmt::Display for Pace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pace::Relaxed => write!(f, "relaxed"),
            Pace::Steady => write!(f, "steady"),
            Pace::Intensive => write!(f, "intensive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub pace: Pace,
    /// Free-form teaching style, e.g. "socratic" or "worked examples".
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub statement: String,
    /// Added while re-planning around a gap.
    #[serde(default)]
    pub prerequisite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveScore {
    pub attempts: u32,
    pub correct: u32,
    /// Correct answers in a row.
    pub streak: u32,
}

impl ObjectiveScore {
    pub fn record(&mut self, correct: bool) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
            self.streak += 1;
        } else {
            self.streak = 0;
        }
    }
}

/// Domain state of a tutoring session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorState {
    pub topic: String,
    pub preferences: Option<Preferences>,
    pub configure: PhaseProgress,
    pub objectives: Vec<Objective>,
    /// The learner picked a final objective list; approval is still pending.
    pub plan_selected: bool,
    pub plan: PhaseProgress,
    /// A practice question is out and unanswered.
    pub practice: PhaseProgress,
    /// Id of the objective being practiced.
    pub current: Option<String>,
    pub scores: BTreeMap<String, ObjectiveScore>,
    pub completed: Vec<String>,
    /// Missing prerequisite reported during practice.
    pub gap: Option<String>,
    next_id: u32,
}

impl TutorState {
    pub fn new(topic: &str) -> Self {
        let topic = topic.trim();
        Self {
            topic: if topic.is_empty() {
                "the chosen topic".to_string()
            } else {
                topic.to_string()
            },
            ..Self::default()
        }
    }

    /// Starter objectives for a fresh plan.
    pub fn seed_objectives(&mut self) {
        if !self.objectives.is_empty() {
            return;
        }
        let topic = self.topic.clone();
        self.add_objective(format!("Explain {} in your own words", topic), false);
        self.add_objective(format!("Work through a small example of {}", topic), false);
        self.add_objective(format!("Spot where {} stops applying", topic), false);
    }

    pub fn add_objective(&mut self, statement: impl Into<String>, prerequisite: bool) -> String {
        self.next_id += 1;
        let id = format!("obj-{}", self.next_id);
        self.objectives.push(Objective {
            id: id.clone(),
            statement: statement.into(),
            prerequisite,
        });
        id
    }

    pub fn drop_objective(&mut self, id: &str) -> bool {
        let before = self.objectives.len();
        self.objectives.retain(|o| o.id != id);
        self.scores.remove(id);
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.objectives.len() != before
    }

    /// Insert a prerequisite ahead of the current objective and practice it next.
    pub fn insert_prerequisite(&mut self, statement: impl Into<String>) -> String {
        let id = self.add_objective(statement, true);
        if let Some(objective) = self.objectives.pop() {
            let at = self
                .current
                .as_deref()
                .and_then(|cur| self.objectives.iter().position(|o| o.id == cur))
                .unwrap_or(self.objectives.len());
            self.objectives.insert(at, objective);
        }
        self.current = Some(id.clone());
        id
    }

    pub fn objective(&self, id: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id == id)
    }

    pub fn current_objective(&self) -> Option<&Objective> {
        self.current.as_deref().and_then(|id| self.objective(id))
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.iter().any(|c| c == id)
    }

    pub fn has_remaining(&self) -> bool {
        self.objectives.iter().any(|o| !self.is_completed(&o.id))
    }

    /// Point `current` at the first objective not yet completed.
    pub fn select_next(&mut self) -> Option<&Objective> {
        let next = self
            .objectives
            .iter()
            .find(|o| !self.is_completed(&o.id))
            .map(|o| o.id.clone());
        self.current = next;
        self.current_objective()
    }

    pub fn score(&self, id: &str) -> ObjectiveScore {
        self.scores.get(id).copied().unwrap_or_default()
    }

    pub fn is_mastered(&self) -> bool {
        self.current
            .as_deref()
            .is_some_and(|id| self.score(id).streak >= MASTERY_STREAK)
    }

    /// Mark the current objective completed and clear the selection.
    pub fn complete_current(&mut self) -> Option<String> {
        let id = self.current.take()?;
        if !self.is_completed(&id) {
            self.completed.push(id.clone());
        }
        Some(id)
    }

    pub fn total_attempts(&self) -> u32 {
        self.scores.values().map(|s| s.attempts).sum()
    }
}
