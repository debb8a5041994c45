// src/session/store.rs — Concurrent session registry
//
// One mutex guards the map structure only. Per-session fields live behind
// each session's own lock, so holding the map lock never waits on a job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::{terminal_error, InvalidationReason, Session, SessionData, SessionId, SessionStatus};
use crate::infra::errors::SessionError;

/// What is left of a session after it reached a terminal state: enough to
/// tell a late caller why the session is gone, nothing more.
#[derive(Debug, Clone, Copy)]
pub struct Tombstone {
    pub status: SessionStatus,
    pub reason: Option<InvalidationReason>,
    pub retired_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    live: HashMap<SessionId, Arc<Session>>,
    tombstones: HashMap<SessionId, Tombstone>,
}

#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session under a fresh id.
    pub fn create(&self, data: SessionData, payload: Vec<u8>) -> Result<Arc<Session>, SessionError> {
        self.insert(Arc::new(Session::new(data, payload)))
    }

    pub(crate) fn insert(&self, session: Arc<Session>) -> Result<Arc<Session>, SessionError> {
        let id = session.id();
        let mut inner = self.lock();
        if inner.live.contains_key(&id) || inner.tombstones.contains_key(&id) {
            tracing::error!(session_id = %id, "duplicate session id on create");
            return Err(SessionError::Invariant(format!("session id {id} already issued")));
        }
        inner.live.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Plain lookup. Freshness is the caller's business; a retired id
    /// reports why it was retired.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let inner = self.lock();
        if let Some(session) = inner.live.get(id) {
            return Ok(Arc::clone(session));
        }
        match inner.tombstones.get(id) {
            Some(t) => Err(terminal_error(*id, t.status, t.reason)),
            None => Err(SessionError::NotFound(*id)),
        }
    }

    /// Idempotent removal. Returns whether a live session was removed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let mut inner = self.lock();
        inner.tombstones.remove(id);
        inner.live.remove(id).is_some()
    }

    /// Move a terminal session out of the live map, leaving a tombstone.
    /// No-op for sessions that are not terminal or already retired.
    pub fn retire(&self, session: &Session) -> bool {
        let status = session.status();
        if !status.is_terminal() {
            return false;
        }
        let reason = session.invalidation_reason();
        let mut inner = self.lock();
        let removed = inner.live.remove(&session.id()).is_some();
        if removed {
            inner.tombstones.insert(
                session.id(),
                Tombstone {
                    status,
                    reason,
                    retired_at: Utc::now(),
                },
            );
        }
        removed
    }

    /// Point-in-time copy of the live sessions. The map lock is held only
    /// while cloning the `Arc`s.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().live.values().cloned().collect()
    }

    /// Drop tombstones retired more than `ttl` before `now`.
    pub fn prune_tombstones(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let mut inner = self.lock();
        let before = inner.tombstones.len();
        inner.tombstones.retain(|_, t| now - t.retired_at < ttl);
        before - inner.tombstones.len()
    }

    /// Live or tombstoned.
    pub fn knows(&self, id: &SessionId) -> bool {
        let inner = self.lock();
        inner.live.contains_key(id) || inner.tombstones.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_count(&self) -> usize {
        self.lock().tombstones.len()
    }
}
