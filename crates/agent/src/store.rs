//! Registry of live sessions.
//!
//! The index is a sharded map, so insert/lookup/remove only contend with
//! operations on ids in the same shard and never with a whole-index lock.
//! Each session has its own mutex: actions on one session are serialized
//! while actions on different sessions run in parallel.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskcell_core::{Error, Result};
use taskcell_driver::DriverHandle;
use tokio::sync::Mutex;
use tracing::debug;

use crate::session::{Session, SessionId};

pub type SessionRef = Arc<Mutex<Session>>;

struct Entry {
    session: SessionRef,
    created_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Entry>,
    /// Live sessions plus reservations for ones being created.
    live: AtomicUsize,
    /// 0 means unlimited.
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            live: AtomicUsize::new(0),
            max_sessions,
        }
    }

    fn at_capacity(&self, live: usize) -> bool {
        self.max_sessions > 0 && live >= self.max_sessions
    }

    /// Fail early, before an actuator is started for a session that cannot be
    /// stored.
    pub fn check_capacity(&self) -> Result<()> {
        if self.at_capacity(self.live.load(Ordering::Acquire)) {
            return Err(Error::SessionLimit(self.max_sessions));
        }
        Ok(())
    }

    fn reserve(&self) -> Result<()> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (!self.at_capacity(live)).then_some(live + 1)
            })
            .map(|_| ())
            .map_err(|_| Error::SessionLimit(self.max_sessions))
    }

    /// Register a new session bound to `driver`. The id never collides with a
    /// live session.
    pub fn create(&self, driver: DriverHandle, max_logs: usize) -> Result<(SessionId, SessionRef)> {
        self.reserve()?;

        loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if let MapEntry::Vacant(slot) = self.sessions.entry(candidate.clone()) {
                let session = Session::new(candidate.clone(), driver, max_logs);
                let created_at = session.created_at();
                let session = Arc::new(Mutex::new(session));
                slot.insert(Entry {
                    session: session.clone(),
                    created_at,
                });
                debug!(session_id = %candidate, live = self.len(), "Session created");
                return Ok((candidate, session));
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<SessionRef> {
        self.sessions
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Result<SessionRef> {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                debug!(session_id = %id, "Session removed");
                Ok(entry.session)
            }
            None => Err(Error::SessionNotFound(id.to_string())),
        }
    }

    /// Ids of sessions created more than `ttl_secs` ago.
    pub fn expired(&self, ttl_secs: u64) -> Vec<SessionId> {
        let Ok(ttl) = i64::try_from(ttl_secs) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - ChronoDuration::seconds(ttl);
        self.sessions
            .iter()
            .filter(|e| e.created_at < cutoff)
            .map(|e| e.key().clone())
            .collect()
    }

    /// All live sessions, oldest first.
    pub fn all(&self) -> Vec<SessionRef> {
        let mut entries: Vec<(DateTime<Utc>, SessionRef)> = self
            .sessions
            .iter()
            .map(|e| (e.created_at, e.session.clone()))
            .collect();
        entries.sort_by_key(|(created_at, _)| *created_at);
        entries.into_iter().map(|(_, session)| session).collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
