//! Redis-backed session storage.
//!
//! Each session is one hash keyed by its ID; session keys map 1:1 onto hash
//! fields. There is no sweep: every request refreshes the hash's TTL with
//! `EXPIRE`, and Redis drops idle sessions on its own.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use tracing::warn;

use super::{Session, SessionError, SessionStore};
use crate::config::Config;
use crate::error::Error;

/// Session records kept as Redis hashes.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisStore {
    /// Connects to `target`, giving up after `connect_timeout`.
    pub async fn connect(
        target: impl IntoConnectionInfo,
        ttl: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = redis::Client::open(target)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "redis connect timed out"))??;
        Ok(Self { conn, ttl })
    }

    /// Reads `session.redis.address` (default `127.0.0.1:6379`),
    /// `session.redis.password` (default none), `session.redis.database`
    /// (default 0), `session.redis.ttl` (default 86400 s), and
    /// `session.redis.connect_timeout` (default 5 s).
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        let info = connection_info(config)?;
        let ttl = config.parse::<u64>("session.redis.ttl", 86_400)?;
        let timeout = config.parse::<u64>("session.redis.connect_timeout", 5)?;
        Ok(Self::connect(info, Duration::from_secs(ttl), Duration::from_secs(timeout)).await?)
    }
}

/// Maps the `session.redis.*` keys onto connection settings. The password is
/// passed through verbatim, never through a URL.
fn connection_info(config: &Config) -> Result<ConnectionInfo, Error> {
    let address = config.get_or("session.redis.address", "127.0.0.1:6379");
    let invalid = || Error::InvalidConfig {
        key: "session.redis.address".to_owned(),
        value: address.to_owned(),
    };
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (address, 6379),
    };
    if host.is_empty() {
        return Err(invalid());
    }

    let password = config.get_or("session.redis.password", "");
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_owned(), port),
        redis: RedisConnectionInfo {
            db: config.parse::<i64>("session.redis.database", 0)?,
            password: (!password.is_empty()).then(|| password.to_owned()),
            ..RedisConnectionInfo::default()
        },
    })
}

#[async_trait]
impl SessionStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn open(&self, id: &str) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(RedisSession {
            id: id.to_owned(),
            conn: self.conn.clone(),
            ttl: self.ttl,
        }))
    }
}

struct RedisSession {
    id: String,
    conn: ConnectionManager,
    ttl: Duration,
}

#[async_trait]
impl Session for RedisSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> String {
        let mut conn = self.conn.clone();
        match conn.hget::<_, _, Option<String>>(&self.id, key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(session = %self.id, key, "session read failed: {e}");
                String::new()
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&self.id, key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(&self.id, key).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.id).await?;
        Ok(())
    }

    async fn touch(&self) -> Result<(), SessionError> {
        let seconds = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(&self.id, seconds).await?;
        Ok(())
    }
}
