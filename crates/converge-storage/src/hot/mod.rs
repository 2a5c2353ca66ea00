// Hot tier: bounded cache for active sessions.
//
// Entries hold the session plus its transcript in read-ready (sanitized,
// decrypted) form. Eviction is LRU plus an idle TTL; an entry is never
// served past its TTL, so the cache can lag the warm store but not lie
// about it for longer than that.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use converge_core::{Message, Result, Session};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryHotCache;
pub use redis::RedisHotCache;

/// One cached session with its transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub session: Session,
    pub messages: Vec<Message>,
}

impl std::fmt::Debug for dyn HotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn HotCache")
    }
}

/// Capability interface of the hot tier.
#[async_trait]
pub trait HotCache: Send + Sync + 'static {
    /// Fetch a live entry; expired entries are treated as absent.
    async fn get(&self, id: Uuid) -> Result<Option<CachedSession>>;

    /// Insert or refresh an entry (write-through from the registry).
    async fn put(&self, entry: CachedSession) -> Result<()>;

    /// Drop an entry (session deletion, archival).
    async fn delete(&self, id: Uuid) -> Result<()>;
}
