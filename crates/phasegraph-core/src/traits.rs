use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::*;

/// The language-model collaborator behind a phase.
pub trait TextGenerator: Send + Sync + 'static {
    /// Send a request and receive a stream of text and command deltas.
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationDelta>>>>;
}

/// Persistence backend for engine snapshots.
pub trait StateStore: Send + Sync + 'static {
    /// Load the persisted state for a session, if any.
    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<PersistedState>>>;

    /// Save (overwrite) the persisted state for a session.
    fn save(&self, sid: &SessionId, state: &PersistedState) -> BoxFuture<'_, Result<()>>;

    /// Delete a session's state. Returns true if something was removed.
    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>>;

    /// List known session ids.
    fn list(&self) -> BoxFuture<'_, Result<Vec<SessionId>>>;
}
