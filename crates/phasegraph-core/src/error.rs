use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhaseGraphError {
    // Graph errors
    #[error("Graph configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Exceeded {limit} phase transitions in a single turn (stopped in '{phase}')")]
    TransitionLimitExceeded { limit: usize, phase: String },

    // Execution errors
    #[error("Phase '{phase}' failed: {message}")]
    Executor { phase: String, message: String },

    #[error("Text generation failed: {0}")]
    Generation(String),

    // Checkpoint errors
    #[error("Checkpoint timeout: {id}")]
    CheckpointTimeout { id: String },

    #[error("Checkpoint cancelled: {id}")]
    CheckpointCancelled { id: String },

    // Persistence errors
    #[error("Cannot restore state: {0}")]
    Restore(String),

    #[error("State store error: {0}")]
    Store(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PhaseGraphError {
    /// Stable, machine-readable code surfaced to users in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::TransitionLimitExceeded { .. } => "transition_limit",
            Self::Executor { .. } | Self::Generation(_) => "executor_error",
            Self::CheckpointTimeout { .. } => "checkpoint_timeout",
            Self::CheckpointCancelled { .. } => "checkpoint_cancelled",
            Self::Restore(_) => "restore_error",
            Self::Store(_) => "store_error",
            Self::Config(_) | Self::ConfigNotFound(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, PhaseGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            PhaseGraphError::Configuration("x".into()).code(),
            "configuration_error"
        );
        assert_eq!(
            PhaseGraphError::Executor {
                phase: "diagnose".into(),
                message: "boom".into()
            }
            .code(),
            "executor_error"
        );
        assert_eq!(PhaseGraphError::Generation("down".into()).code(), "executor_error");
        assert_eq!(PhaseGraphError::Restore("x".into()).code(), "restore_error");
    }

    #[test]
    fn test_display_includes_phase() {
        let err = PhaseGraphError::TransitionLimitExceeded {
            limit: 4,
            phase: "review".into(),
        };
        let text = err.to_string();
        assert!(text.contains("4"));
        assert!(text.contains("review"));
    }
}
