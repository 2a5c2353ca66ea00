// Redis hot cache. Entries are JSON blobs under `hot:session:<id>` with a
// server-side TTL; GETEX refreshes the TTL on read so the bound behaves as
// an idle timeout. Capacity is left to Redis' own maxmemory-lru policy.

use std::time::Duration;

use async_trait::async_trait;
use converge_core::{CoreError, Result};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use super::{CachedSession, HotCache};

/// Redis-backed implementation of [`HotCache`].
#[derive(Clone)]
pub struct RedisHotCache {
    conn: ConnectionManager,
    idle_ttl: Duration,
}

impl RedisHotCache {
    pub fn new(conn: ConnectionManager, idle_ttl: Duration) -> Self {
        Self { conn, idle_ttl }
    }

    pub async fn connect(url: &str, idle_ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::fatal(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::transient(format!("redis connect: {e}")))?;
        Ok(Self::new(conn, idle_ttl))
    }

    fn key(id: Uuid) -> String {
        format!("hot:session:{id}")
    }
}

fn transient(e: redis::RedisError) -> CoreError {
    CoreError::transient(format!("redis: {e}"))
}

#[async_trait]
impl HotCache for RedisHotCache {
    async fn get(&self, id: Uuid) -> Result<Option<CachedSession>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GETEX")
            .arg(Self::key(id))
            .arg("EX")
            .arg(self.idle_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        match raw {
            Some(raw) => {
                let entry = serde_json::from_str(&raw)
                    .map_err(|e| CoreError::fatal(format!("corrupt cache entry {id}: {e}")))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CachedSession) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&entry)
            .map_err(|e| CoreError::fatal(format!("serialize cache entry: {e}")))?;
        redis::cmd("SET")
            .arg(Self::key(entry.session.id))
            .arg(raw)
            .arg("EX")
            .arg(self.idle_ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(Self::key(id))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;
        Ok(())
    }
}
