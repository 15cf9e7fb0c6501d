use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use phasegraph_core::types::SessionId;

/// Held for the duration of one turn; dropping it releases the session.
pub type LaneGuard = OwnedMutexGuard<()>;

/// Per-session single-writer lanes.
///
/// At most one turn runs per session at a time. Turns for different
/// sessions never wait on each other; turns for the same session queue in
/// arrival order.
#[derive(Default)]
pub struct SessionLanes {
    lanes: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl SessionLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the session's lane is free and take it.
    pub async fn acquire(&self, sid: &SessionId) -> LaneGuard {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(lanes.entry(sid.clone()).or_default())
        };
        trace!(session = %sid, "Waiting for session lane");
        lane.lock_owned().await
    }

    /// Take the lane only if no turn is running for the session.
    pub fn try_acquire(&self, sid: &SessionId) -> Option<LaneGuard> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(lanes.entry(sid.clone()).or_default())
            .try_lock_owned()
            .ok()
    }

    /// Number of sessions with a turn in flight.
    pub fn active(&self) -> usize {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.values().filter(|lane| lane.try_lock().is_err()).count()
    }

    /// Forget the session's lane if nobody holds or waits on it.
    ///
    /// Callers drop their guard first. Waiters clone the lane under the map
    /// lock, so a lane with no other reference can be removed safely.
    pub fn release(&self, sid: &SessionId) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if lanes.get(sid).is_some_and(|lane| Arc::strong_count(lane) == 1) {
            lanes.remove(sid);
            trace!(session = %sid, "Released session lane");
        }
    }

    /// Number of sessions that currently have a lane.
    pub fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let lanes = Arc::new(SessionLanes::new());
        let sid = SessionId::from_str("s1");

        let guard = lanes.acquire(&sid).await;
        assert!(lanes.try_acquire(&sid).is_none());
        assert_eq!(lanes.active(), 1);

        let waiter = {
            let lanes = lanes.clone();
            let sid = sid.clone();
            tokio::spawn(async move {
                let _guard = lanes.acquire(&sid).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(lanes.active(), 0);
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let lanes = SessionLanes::new();
        let _a = lanes.acquire(&SessionId::from_str("a")).await;
        let b = lanes.try_acquire(&SessionId::from_str("b"));
        assert!(b.is_some());
        assert_eq!(lanes.active(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_lane_with_waiter() {
        let lanes = Arc::new(SessionLanes::new());
        let sid = SessionId::from_str("busy");

        let guard = lanes.acquire(&sid).await;
        let waiter = {
            let lanes = lanes.clone();
            let sid = sid.clone();
            tokio::spawn(async move {
                let guard = lanes.acquire(&sid).await;
                drop(guard);
                lanes.release(&sid);
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(guard);
        lanes.release(&sid);
        // The waiter may or may not have taken the lane yet; either way it
        // releases it when done
        waiter.await.unwrap();
        assert!(lanes.is_empty());
    }

    #[tokio::test]
    async fn test_release_ignores_held_lane() {
        let lanes = SessionLanes::new();
        let sid = SessionId::from_str("held");
        let guard = lanes.acquire(&sid).await;

        lanes.release(&sid);
        assert_eq!(lanes.len(), 1);
        assert!(lanes.try_acquire(&sid).is_none());

        drop(guard);
        lanes.release(&sid);
        assert!(lanes.is_empty());
    }
}
