//! In-process session storage.
//!
//! All records live in one map owned by the [`MemoryStore`]. Every read and
//! write goes through its mutex, so concurrent requests on the same session
//! never lose updates. Records disappear on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{PurgeSchedule, Session, SessionError, SessionStore};
use crate::config::Config;
use crate::error::Error;

#[derive(Debug)]
struct StoredSession {
    modified: SystemTime,
    data: HashMap<String, String>,
}

impl StoredSession {
    fn new(modified: SystemTime) -> Self {
        Self { modified, data: HashMap::new() }
    }
}

#[derive(Debug)]
struct Shared {
    sessions: Mutex<HashMap<String, StoredSession>>,
    schedule: PurgeSchedule,
}

/// Session records kept in process memory.
///
/// Cheap to clone; clones share the same records.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new(schedule: PurgeSchedule) -> Self {
        Self {
            shared: Arc::new(Shared { sessions: Mutex::new(HashMap::new()), schedule }),
        }
    }

    /// Reads `session_memory_ttl` (default 86400 s) and
    /// `session_memory_purgettl` (default 1800 s).
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let ttl = config.parse::<u64>("session_memory_ttl", 86_400)?;
        let interval = config.parse::<u64>("session_memory_purgettl", 1_800)?;
        Ok(Self::new(PurgeSchedule::new(
            Duration::from_secs(interval),
            Duration::from_secs(ttl),
        )))
    }

    pub fn schedule(&self) -> &PurgeSchedule {
        &self.shared.schedule
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.sessions.lock().contains_key(id)
    }

    /// Overrides a record's last-modified time. Returns `false` if no
    /// record exists for `id`.
    pub fn set_modified(&self, id: &str, at: SystemTime) -> bool {
        match self.shared.sessions.lock().get_mut(id) {
            Some(record) => {
                record.modified = at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, id: &str) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(MemorySession { id: id.to_owned(), shared: Arc::clone(&self.shared) }))
    }

    async fn purge(&self, now: SystemTime) -> Result<usize, SessionError> {
        let Some(ticket) = self.shared.schedule.begin(now) else {
            return Ok(0);
        };

        let mut sessions = self.shared.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, record| !ticket.is_expired(record.modified));
        let removed = before - sessions.len();
        drop(sessions);

        if removed > 0 {
            info!(removed, "purged expired memory sessions");
        } else {
            debug!("memory session purge found nothing to remove");
        }
        Ok(removed)
    }
}

struct MemorySession {
    id: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> String {
        self.shared
            .sessions
            .lock()
            .get(&self.id)
            .and_then(|record| record.data.get(key).cloned())
            .unwrap_or_default()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let now = SystemTime::now();
        let mut sessions = self.shared.sessions.lock();
        let record = sessions.entry(self.id.clone()).or_insert_with(|| StoredSession::new(now));
        record.data.insert(key.to_owned(), value.to_owned());
        record.modified = now;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        if let Some(record) = self.shared.sessions.lock().get_mut(&self.id) {
            if record.data.remove(key).is_some() {
                record.modified = SystemTime::now();
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        self.shared.sessions.lock().remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store_at(last_purge: SystemTime) -> MemoryStore {
        MemoryStore::new(PurgeSchedule::starting_at(HOUR, 24 * HOUR, last_purge))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = store_at(SystemTime::now());
        let session = store.open("abc").await.unwrap();

        session.set("k", "v").await.unwrap();
        assert_eq!(session.get("k").await, "v");
        assert_eq!(session.get("missing").await, "");

        let again = store.open("abc").await.unwrap();
        assert_eq!(again.get("k").await, "v");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store_at(SystemTime::now());
        let session = store.open("abc").await.unwrap();

        session.set("k", "v").await.unwrap();
        session.delete("k").await.unwrap();
        session.delete("k").await.unwrap();
        session.delete("never-set").await.unwrap();
        assert_eq!(session.get("k").await, "");
    }

    #[tokio::test]
    async fn destroyed_session_reads_as_new() {
        let store = store_at(SystemTime::now());
        let session = store.open("abc").await.unwrap();
        session.set("k", "v").await.unwrap();

        session.destroy().await.unwrap();
        assert!(!store.contains("abc"));
        assert_eq!(store.open("abc").await.unwrap().get("k").await, "");
    }

    #[tokio::test]
    async fn purge_removes_only_expired_records() {
        let start = SystemTime::now();
        let store = store_at(start);
        store.open("old").await.unwrap().set("k", "v").await.unwrap();
        store.open("young").await.unwrap().set("k", "v").await.unwrap();

        let now = start + 2 * HOUR;
        store.set_modified("old", now - 25 * HOUR);
        store.set_modified("young", now - 23 * HOUR);

        assert_eq!(store.purge(now).await.unwrap(), 1);
        assert!(!store.contains("old"));
        assert!(store.contains("young"));
    }

    #[tokio::test]
    async fn purge_waits_for_interval() {
        let start = SystemTime::now();
        let store = store_at(start);
        store.open("old").await.unwrap().set("k", "v").await.unwrap();
        store.set_modified("old", start - 48 * HOUR);

        assert_eq!(store.purge(start + HOUR / 2).await.unwrap(), 0);
        assert!(store.contains("old"));
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_updates() {
        let store = store_at(SystemTime::now());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.spawn(async move {
                let session = store.open("shared").await.unwrap();
                session.set(&format!("k{i}"), "v").await.unwrap();
            });
        }
        while tasks.join_next().await.is_some() {}

        let session = store.open("shared").await.unwrap();
        for i in 0..32 {
            assert_eq!(session.get(&format!("k{i}")).await, "v");
        }
    }
}
