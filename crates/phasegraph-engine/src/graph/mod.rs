//! Phase graph: the per-agent set of phases and conditional transitions.
//!
//! A graph is declared as a list of `Transition`s plus a table of named
//! condition predicates. `PhaseGraphBuilder::build` resolves every
//! transition to its predicate once and validates the shape (terminal has no
//! exits, every phase can reach the terminal, no unknown conditions), so a
//! broken graph is rejected before the first turn runs.

pub mod builder;
pub mod transition;

pub use builder::{Condition, PhaseGraph, PhaseGraphBuilder};
pub use transition::Transition;
