use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PhaseGraphError, Result};

/// Top-level phasegraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Circuit breaker: most phase transitions allowed within one turn.
    #[serde(default = "default_max_transitions_per_turn")]
    pub max_transitions_per_turn: usize,
    /// Snapshot the context before each phase execution and restore it
    /// if the executor fails.
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// How long a checkpoint may wait for an external answer.
    #[serde(default = "default_checkpoint_timeout")]
    pub checkpoint_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions_per_turn: default_max_transitions_per_turn(),
            rollback_on_failure: false,
            checkpoint_timeout_secs: default_checkpoint_timeout(),
        }
    }
}

/// Where session state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per session under `state_dir`.
    #[default]
    File,
    /// A single SQLite database at `db_path`.
    Sqlite,
    /// Process memory only; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory holding one JSON state file per session.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            state_dir: default_state_dir(),
            db_path: default_db_path(),
        }
    }
}

fn default_max_transitions_per_turn() -> usize { 32 }
fn default_checkpoint_timeout() -> u64 { 300 }
fn default_state_dir() -> String { "~/.phasegraph/sessions".to_string() }
fn default_db_path() -> String { "~/.phasegraph/sessions.db".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PhaseGraphError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| PhaseGraphError::Config(e.to_string()))?;
        debug!(path = %path.display(), backend = ?config.store.backend, "Loaded config");
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the state directory (expand ~).
    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.store.state_dir)
    }

    /// Resolve the SQLite database path (expand ~).
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.store.db_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => {
                    warn!(var = %var_name, "Config references an unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name))
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
