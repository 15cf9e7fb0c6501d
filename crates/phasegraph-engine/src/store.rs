use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;
use tracing::debug;

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::traits::StateStore;
use phasegraph_core::types::{PersistedState, SessionId};

/// In-process store, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<SessionId, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<PersistedState>>> {
        let sid = sid.clone();
        Box::pin(async move { Ok(self.states.read().await.get(&sid).cloned()) })
    }

    fn save(&self, sid: &SessionId, state: &PersistedState) -> BoxFuture<'_, Result<()>> {
        let sid = sid.clone();
        let state = state.clone();
        Box::pin(async move {
            self.states.write().await.insert(sid, state);
            Ok(())
        })
    }

    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let sid = sid.clone();
        Box::pin(async move { Ok(self.states.write().await.remove(&sid).is_some()) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<SessionId>>> {
        Box::pin(async move {
            let mut ids: Vec<_> = self.states.read().await.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}

/// One pretty-printed JSON file per session: `{dir}/{session_id}.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write never leaves a truncated state file behind.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, sid: &SessionId) -> Result<PathBuf> {
        validate_session_id(sid)?;
        Ok(self.dir.join(format!("{}.json", sid.0)))
    }
}

fn validate_session_id(sid: &SessionId) -> Result<()> {
    let id = sid.0.as_str();
    if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
        return Err(PhaseGraphError::Store(format!("invalid session id '{}'", id)));
    }
    Ok(())
}

impl StateStore for FileStateStore {
    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<PersistedState>>> {
        let path = self.path_for(sid);
        Box::pin(async move {
            let path = path?;
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let state = serde_json::from_str(&content).map_err(|e| {
                        PhaseGraphError::Store(format!("corrupt state file {}: {}", path.display(), e))
                    })?;
                    Ok(Some(state))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn save(&self, sid: &SessionId, state: &PersistedState) -> BoxFuture<'_, Result<()>> {
        let path = self.path_for(sid);
        let content = serde_json::to_string_pretty(state);
        Box::pin(async move {
            let path = path?;
            let content = content?;
            tokio::fs::create_dir_all(&self.dir).await?;

            let tmp = self
                .dir
                .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&tmp, content).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }

            debug!(path = %path.display(), "Saved session state");
            Ok(())
        })
    }

    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let path = self.path_for(sid);
        Box::pin(async move {
            match tokio::fs::remove_file(path?).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<SessionId>>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut ids = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(SessionId::from_str(id));
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}

/// SQLite-backed store: one row per session holding the JSON snapshot.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS session_state (
        session_id TEXT PRIMARY KEY,
        agent_type TEXT NOT NULL,
        current_phase TEXT NOT NULL,
        state TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );";

impl SqliteStateStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PhaseGraphError::Store(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite state store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PhaseGraphError::Store(e.to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> PhaseGraphError {
    PhaseGraphError::Store(e.to_string())
}

impl StateStore for SqliteStateStore {
    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<PersistedState>>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let content: Option<String> = {
                let conn = self.conn()?;
                conn.query_row(
                    "SELECT state FROM session_state WHERE session_id = ?1",
                    params![sid],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?
            };
            match content {
                Some(content) => Ok(Some(serde_json::from_str(&content).map_err(|e| {
                    PhaseGraphError::Store(format!("corrupt state for session {}: {}", sid, e))
                })?)),
                None => Ok(None),
            }
        })
    }

    fn save(&self, sid: &SessionId, state: &PersistedState) -> BoxFuture<'_, Result<()>> {
        let sid = sid.0.clone();
        let agent_type = state.agent_type.clone();
        let current_phase = state.current_phase.clone();
        let content = serde_json::to_string(state);
        Box::pin(async move {
            let content = content?;
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO session_state (session_id, agent_type, current_phase, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                    agent_type = excluded.agent_type,
                    current_phase = excluded.current_phase,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![sid, agent_type, current_phase, content, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let conn = self.conn()?;
            let removed = conn
                .execute("DELETE FROM session_state WHERE session_id = ?1", params![sid])
                .map_err(db_err)?;
            Ok(removed > 0)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<SessionId>>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT session_id FROM session_state ORDER BY session_id")
                .map_err(db_err)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(ids.into_iter().map(SessionId).collect())
        })
    }
}
