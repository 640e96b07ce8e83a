//! File-backed session storage.
//!
//! One `<id>.sess` file per session, holding a JSON object of strings. Every
//! `set` and `delete` reads the whole file, changes it, and writes it back.
//! There is no file locking: two requests mutating the same session at the
//! same moment can lose one of the writes. Sessions are rarely written
//! concurrently by one browser, so the store accepts that.
//!
//! Expiry uses the file modification time, which every write refreshes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{PurgeSchedule, Session, SessionError, SessionStore};
use crate::config::Config;
use crate::error::Error;

const EXTENSION: &str = "sess";

#[derive(Debug)]
struct Shared {
    dir: PathBuf,
    schedule: PurgeSchedule,
}

/// Session records kept as JSON files in one directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    shared: Arc<Shared>,
}

impl FileStore {
    /// The directory must already exist.
    pub fn new(dir: impl Into<PathBuf>, schedule: PurgeSchedule) -> Self {
        Self { shared: Arc::new(Shared { dir: dir.into(), schedule }) }
    }

    /// Reads `session_file_path` (default `/tmp/`), `session_file_ttl`
    /// (default 86400 s), and `session_file_purgettl` (default 1800 s).
    /// Creates the directory if it is missing.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let dir = PathBuf::from(config.get_or("session_file_path", "/tmp/"));
        let ttl = config.parse::<u64>("session_file_ttl", 86_400)?;
        let interval = config.parse::<u64>("session_file_purgettl", 1_800)?;

        std::fs::create_dir_all(&dir)?;
        Ok(Self::new(
            dir,
            PurgeSchedule::new(Duration::from_secs(interval), Duration::from_secs(ttl)),
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn schedule(&self) -> &PurgeSchedule {
        &self.shared.schedule
    }

    /// Where the record for `id` lives.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.shared.dir.join(format!("{id}.{EXTENSION}"))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open(&self, id: &str) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(FileSession { id: id.to_owned(), path: self.path_for(id) }))
    }

    async fn purge(&self, now: SystemTime) -> Result<usize, SessionError> {
        let Some(ticket) = self.shared.schedule.begin(now) else {
            return Ok(0);
        };

        let mut expired = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.shared.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), "could not stat session file: {e}");
                    continue;
                }
            };
            if ticket.is_expired(modified) {
                expired.push(path);
            }
        }

        let mut removed = 0;
        for path in expired {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "could not remove expired session file: {e}"),
            }
        }

        if removed > 0 {
            info!(removed, "purged expired session files");
        } else {
            debug!("file session purge found nothing to remove");
        }
        Ok(removed)
    }
}

struct FileSession {
    id: String,
    path: PathBuf,
}

impl FileSession {
    async fn read(&self) -> Result<HashMap<String, String>, SessionError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, data: &HashMap<String, String>) -> Result<(), SessionError> {
        let raw = serde_json::to_vec(data)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl Session for FileSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> String {
        match self.read().await {
            Ok(mut data) => data.remove(key).unwrap_or_default(),
            Err(e) => {
                warn!(session = %self.id, key, "session file unreadable: {e}");
                String::new()
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut data = self.read().await?;
        data.insert(key.to_owned(), value.to_owned());
        self.write(&data).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut data = self.read().await?;
        if data.remove(key).is_some() {
            self.write(&data).await?;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store_in(dir: &TempDir, last_purge: SystemTime) -> FileStore {
        FileStore::new(dir.path(), PurgeSchedule::starting_at(HOUR, 24 * HOUR, last_purge))
    }

    fn backdate(path: &Path, to: SystemTime) {
        std::fs::File::options().write(true).open(path).unwrap().set_modified(to).unwrap();
    }

    #[tokio::test]
    async fn set_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, SystemTime::now());
        let session = store.open("abc").await.unwrap();

        session.set("k", "v").await.unwrap();
        assert_eq!(session.get("k").await, "v");

        let raw = std::fs::read(dir.path().join("abc.sess")).unwrap();
        let data: HashMap<String, String> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(data["k"], "v");
    }

    #[tokio::test]
    async fn delete_persists_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, SystemTime::now());
        let session = store.open("abc").await.unwrap();

        session.set("k", "v").await.unwrap();
        session.set("keep", "1").await.unwrap();
        session.delete("k").await.unwrap();
        session.delete("absent").await.unwrap();

        let reopened = store.open("abc").await.unwrap();
        assert_eq!(reopened.get("k").await, "");
        assert_eq!(reopened.get("keep").await, "1");
    }

    #[tokio::test]
    async fn destroy_removes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, SystemTime::now());
        let session = store.open("abc").await.unwrap();

        session.set("k", "v").await.unwrap();
        session.destroy().await.unwrap();
        assert!(!store.path_for("abc").exists());
        assert_eq!(session.get("k").await, "");
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_reads_empty_but_fails_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, SystemTime::now());
        std::fs::write(store.path_for("abc"), b"not json").unwrap();
        let session = store.open("abc").await.unwrap();

        assert_eq!(session.get("k").await, "");
        assert!(matches!(session.set("k", "v").await, Err(SessionError::Encoding(_))));
    }

    #[tokio::test]
    async fn purge_removes_stale_session_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        let store = store_in(&dir, start);
        store.open("old").await.unwrap().set("k", "v").await.unwrap();
        store.open("young").await.unwrap().set("k", "v").await.unwrap();
        let unrelated = dir.path().join("notes.txt");
        std::fs::write(&unrelated, b"keep me").unwrap();

        let now = start + 2 * HOUR;
        backdate(&store.path_for("old"), now - 30 * HOUR);
        backdate(&unrelated, now - 30 * HOUR);

        assert_eq!(store.purge(now).await.unwrap(), 1);
        assert!(!store.path_for("old").exists());
        assert!(store.path_for("young").exists());
        assert!(unrelated.exists());
    }

    // A dangling `.sess` link stands in for a file removed by a concurrent
    // destroy after the directory was listed.
    #[cfg(unix)]
    #[tokio::test]
    async fn purge_skips_vanished_entries() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        let store = store_in(&dir, start);
        store.open("old").await.unwrap().set("k", "v").await.unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), store.path_for("ghost")).unwrap();

        let now = start + 2 * HOUR;
        backdate(&store.path_for("old"), now - 30 * HOUR);

        assert_eq!(store.purge(now).await.unwrap(), 1);
        assert!(!store.path_for("old").exists());
    }

    // Documents the read-modify-write limitation: interleaved writers on one
    // session each start from the same snapshot, so the first write is lost.
    #[tokio::test]
    async fn interleaved_writers_can_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, SystemTime::now());
        let a = FileSession { id: "abc".into(), path: store.path_for("abc") };
        let b = FileSession { id: "abc".into(), path: store.path_for("abc") };

        let mut snapshot_a = a.read().await.unwrap();
        let mut snapshot_b = b.read().await.unwrap();
        snapshot_a.insert("from_a".into(), "1".into());
        snapshot_b.insert("from_b".into(), "1".into());
        a.write(&snapshot_a).await.unwrap();
        b.write(&snapshot_b).await.unwrap();

        assert_eq!(a.get("from_a").await, "");
        assert_eq!(a.get("from_b").await, "1");
    }
}
