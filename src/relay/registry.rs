//! Live Session Registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::session::{RelaySession, SessionId, SessionStats};
use crate::error::RelayError;

struct RegistryInner {
    sessions: HashMap<SessionId, Arc<RelaySession>>,
    accepting: bool,
}

/// Tracks live sessions and refuses new ones once shutdown has begun.
///
/// The accepting flag and the map share one lock, so a registration can
/// never slip in between "stop accepting" and "drain everything".
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                accepting: true,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate the next session id
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a session, unless shutdown has started
    pub fn register(&self, session: Arc<RelaySession>) -> Result<(), RelayError> {
        let mut inner = self.lock();
        if !inner.accepting {
            return Err(RelayError::ShuttingDown);
        }
        debug!(session_id = session.id, client_id = %session.client_id, "Registered session");
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<RelaySession>> {
        let removed = self.lock().sessions.remove(&id);
        if removed.is_some() {
            debug!(session_id = id, "Removed session from registry");
        }
        removed
    }

    /// Stop accepting registrations and hand back every live session
    pub fn begin_shutdown(&self) -> Vec<Arc<RelaySession>> {
        let mut inner = self.lock();
        inner.accepting = false;
        inner.sessions.values().cloned().collect()
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<RelaySession>> {
        self.lock().sessions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SessionStats> {
        let mut stats: Vec<_> = self
            .lock()
            .sessions
            .values()
            .map(|session| session.to_stats())
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
