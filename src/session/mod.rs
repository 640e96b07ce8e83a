//! Pluggable server-side sessions.
//!
//! A session is a string→string bag addressed by an opaque ID that travels
//! in the `kindleSession` cookie. Three interchangeable backends implement
//! the same [`Session`] contract:
//!
//! | Backend | Record | Expiry |
//! |---|---|---|
//! | [`MemoryStore`] | entry in a mutex-guarded map | [`PurgeSchedule`] sweep |
//! | [`FileStore`] | `<dir>/<id>.sess`, JSON object | [`PurgeSchedule`] sweep over mtimes |
//! | `RedisStore` | one hash key per ID | native key TTL, refreshed on every request |
//!
//! [`SessionMiddleware`](crate::middleware::SessionMiddleware) binds a store
//! to the request pipeline; [`store_from_config`] picks one at startup.

mod file;
mod memory;
mod purge;
#[cfg(feature = "redis")]
mod remote;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::config::Config;
use crate::error::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use purge::{PurgeSchedule, PurgeTicket};
#[cfg(feature = "redis")]
pub use remote::RedisStore;

/// Length of freshly minted session IDs.
pub const SESSION_ID_LEN: usize = 32;

/// Longest cookie value accepted as an existing session ID.
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("remote cache: {0}")]
    Remote(#[from] redis::RedisError),
}

/// One browser's session.
///
/// `get` never fails: an absent key and an unreadable backend both read as
/// the empty string (backends log the latter). Mutations report backend
/// failures so callers can decide whether the write mattered.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    async fn get(&self, key: &str) -> String;

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    /// Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    /// Irrevocably removes the whole record. The ID stays usable and reads
    /// as a brand-new, empty session afterwards.
    async fn destroy(&self) -> Result<(), SessionError>;

    /// Extends the record's lifetime. Called once per request.
    async fn touch(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// A session backend.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Returns a handle for `id`. Opening never creates backend state by
    /// itself; the first write does.
    async fn open(&self, id: &str) -> Result<Box<dyn Session>, SessionError>;

    /// Removes expired records if a sweep is due. Returns how many records
    /// were removed. Backends with native expiry keep the default.
    async fn purge(&self, _now: SystemTime) -> Result<usize, SessionError> {
        Ok(0)
    }
}

/// Mints a new random alphanumeric session ID.
pub fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Whether a client-supplied value may be used as a session ID.
///
/// IDs end up in file names and cache keys, so only URL-safe characters
/// are accepted.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Seconds since the UNIX epoch, as stored in the `init` session value.
pub(crate) fn unix_timestamp(at: SystemTime) -> String {
    at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0).to_string()
}

/// Builds the backend named by the `session_store` config key
/// (`memory`, `file`, or `redis`; default `memory`).
pub async fn store_from_config(config: &Config) -> Result<Arc<dyn SessionStore>, Error> {
    let kind = config.get_or("session_store", "memory");
    let store: Arc<dyn SessionStore> = match kind {
        "memory" => Arc::new(MemoryStore::from_config(config)?),
        "file" => Arc::new(FileStore::from_config(config)?),
        #[cfg(feature = "redis")]
        "redis" => Arc::new(RedisStore::from_config(config).await?),
        other => {
            return Err(Error::InvalidConfig {
                key: "session_store".to_owned(),
                value: other.to_owned(),
            });
        }
    };
    tracing::info!(store = store.name(), "session store ready");
    Ok(store)
}
