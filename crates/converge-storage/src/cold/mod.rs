// Cold tier: append-only compressed bundles of aged sessions in object
// storage. Written only by the retention sweeper; read on cache-and-warm
// miss, with cheap-retrieval semantics.

pub mod object;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::Result;
use uuid::Uuid;

use crate::warm::SessionExport;

pub use object::ObjectStoreArchive;

/// One archived session as the listing sees it.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub session_id: Uuid,
    pub archived_at: DateTime<Utc>,
}

impl std::fmt::Debug for dyn ColdArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn ColdArchive")
    }
}

/// Capability interface of the cold tier.
#[async_trait]
pub trait ColdArchive: Send + Sync + 'static {
    /// Write a session bundle. Overwrites any previous archive of the
    /// same session, which makes sweep replays safe.
    async fn archive_session(&self, export: &SessionExport) -> Result<()>;

    /// Retrieve a session bundle, or `None` when never archived.
    async fn fetch_session(&self, id: Uuid) -> Result<Option<SessionExport>>;

    /// Remove a session bundle. Absent objects are not an error.
    async fn purge_session(&self, id: Uuid) -> Result<()>;

    /// List archived sessions with their archive timestamps, for the
    /// purge pass of the retention sweeper.
    async fn list_archived(&self) -> Result<Vec<ArchiveEntry>>;
}
