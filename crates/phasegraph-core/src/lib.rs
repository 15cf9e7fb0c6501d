pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EngineConfig, StoreBackend, StoreConfig};
pub use error::{PhaseGraphError, Result};
pub use event::{EventSink, EventStream};
pub use types::*;
