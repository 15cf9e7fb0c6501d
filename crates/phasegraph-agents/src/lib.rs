//! Agents built on the phasegraph engine, and an offline generator to
//! drive them from the command line.

pub mod directive;
pub mod tutor;

pub use directive::DirectiveGenerator;
pub use tutor::{TutorAgent, TutorBehavior, TutorCommand, TutorPhase, TutorState};
