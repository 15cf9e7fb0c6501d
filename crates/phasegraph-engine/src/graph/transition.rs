use std::fmt;

use crate::phase::Phase;

/// A directed, conditionally-enabled edge between two phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<P> {
    /// Source phase.
    pub from: P,
    /// Target phase.
    pub to: P,
    /// Name of the condition predicate that enables this edge.
    pub condition: String,
    /// Regression to rework; evaluated before any forward edge.
    pub is_backward: bool,
    /// Higher priority is evaluated first within the same direction.
    pub priority: i32,
}

impl<P: Phase> Transition<P> {
    /// Create a forward transition.
    pub fn forward(from: P, to: P, condition: impl Into<String>) -> Self {
        Self {
            from,
            to,
            condition: condition.into(),
            is_backward: false,
            priority: 0,
        }
    }

    /// Create a backward transition.
    pub fn backward(from: P, to: P, condition: impl Into<String>) -> Self {
        Self {
            from,
            to,
            condition: condition.into(),
            is_backward: true,
            priority: 0,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl<P: Phase> fmt::Display for Transition<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.is_backward { "<-" } else { "->" };
        write!(
            f,
            "{} {} {} ({}",
            self.from.name(),
            arrow,
            self.to.name(),
            self.condition
        )?;
        if self.priority != 0 {
            write!(f, ", priority {}", self.priority)?;
        }
        write!(f, ")")
    }
}
