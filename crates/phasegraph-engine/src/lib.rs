pub mod agent;
pub mod checkpoint;
pub mod command;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod graph;
pub mod lane;
pub mod phase;
pub mod runner;
pub mod serializer;
pub mod store;

pub use agent::{Agent, TurnContext, Visit};
pub use checkpoint::{
    Checkpoint, CheckpointAction, CheckpointBroker, CheckpointFn, CheckpointGate,
    CheckpointHandler, CheckpointResponse,
};
pub use command::{decode_command, ApplyCommand, CommandOutcome};
pub use context::PhaseContext;
pub use engine::{PhaseEngine, TurnOutcome};
pub use evaluator::Decision;
pub use executor::GenerationOutput;
pub use graph::{Condition, PhaseGraph, PhaseGraphBuilder, Transition};
pub use lane::SessionLanes;
pub use phase::{Phase, PhaseProgress};
pub use runner::SessionRunner;
pub use store::{FileStateStore, MemoryStateStore, SqliteStateStore};
