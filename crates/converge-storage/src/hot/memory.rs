// In-process hot cache: LRU capacity bound plus idle TTL.
//
// When both a size hint and a capacity are configured, capacity governs
// eviction; the size hint is advisory only.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use converge_core::Result;
use lru::LruCache;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{CachedSession, HotCache};

struct Entry {
    value: CachedSession,
    last_touched: Instant,
}

/// LRU + idle-TTL cache of active sessions.
pub struct MemoryHotCache {
    entries: Mutex<LruCache<Uuid, Entry>>,
    idle_ttl: Duration,
}

impl MemoryHotCache {
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            idle_ttl,
        }
    }

    /// Current number of live entries (test helper).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HotCache for MemoryHotCache {
    async fn get(&self, id: Uuid) -> Result<Option<CachedSession>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get_mut(&id) {
            Some(entry) => {
                if entry.last_touched.elapsed() > self.idle_ttl {
                    true
                } else {
                    entry.last_touched = Instant::now();
                    return Ok(Some(entry.value.clone()));
                }
            }
            None => return Ok(None),
        };
        if expired {
            entries.pop(&id);
        }
        Ok(None)
    }

    async fn put(&self, entry: CachedSession) -> Result<()> {
        self.entries.lock().put(
            entry.session.id,
            Entry {
                value: entry,
                last_touched: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.entries.lock().pop(&id);
        Ok(())
    }
}
