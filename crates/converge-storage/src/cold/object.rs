// Archive over any `object_store` backend (S3, GCS, Azure, local
// filesystem, in-memory). Bundles are gzip-compressed JSON exports keyed
// `sessions/<id>.json.gz` under the configured prefix.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{CoreError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use uuid::Uuid;

use super::{ArchiveEntry, ColdArchive};
use crate::warm::SessionExport;

/// [`ColdArchive`] implementation over a shared object store.
pub struct ObjectStoreArchive {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStoreArchive {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self { store, prefix }
    }

    fn path(&self, suffix: &str) -> Path {
        match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{suffix}")),
            None => Path::from(suffix),
        }
    }

    fn session_path(&self, id: Uuid) -> Path {
        self.path(&format!("sessions/{id}.json.gz"))
    }

    fn compress(export: &SessionExport) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(export)
            .map_err(|e| CoreError::fatal(format!("serialize archive bundle: {e}")))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map_err(|e| CoreError::fatal(format!("compress archive bundle: {e}")))
    }

    fn decompress(raw: &[u8]) -> Result<SessionExport> {
        let mut decoder = GzDecoder::new(raw);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| CoreError::fatal(format!("decompress archive bundle: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| CoreError::fatal(format!("parse archive bundle: {e}")))
    }
}

fn store_err(e: object_store::Error) -> CoreError {
    CoreError::transient(format!("object store: {e}"))
}

#[async_trait]
impl ColdArchive for ObjectStoreArchive {
    async fn archive_session(&self, export: &SessionExport) -> Result<()> {
        let payload = PutPayload::from(Self::compress(export)?);
        self.store
            .put(&self.session_path(export.session.id), payload)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn fetch_session(&self, id: Uuid) -> Result<Option<SessionExport>> {
        match self.store.get(&self.session_path(id)).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(store_err)?;
                Ok(Some(Self::decompress(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn purge_session(&self, id: Uuid) -> Result<()> {
        match self.store.delete(&self.session_path(id)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn list_archived(&self) -> Result<Vec<ArchiveEntry>> {
        let prefix = self.path("sessions");
        let mut listing = self.store.list(Some(&prefix));
        let mut entries = vec![];
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(store_err)?;
            let Some(name) = meta.location.filename() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json.gz") else {
                continue;
            };
            if let Ok(session_id) = stem.parse::<Uuid>() {
                entries.push(ArchiveEntry {
                    session_id,
                    archived_at: meta.last_modified,
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge_core::{Session, SessionState};
    use object_store::memory::InMemory;

    fn export(id: Uuid) -> SessionExport {
        SessionExport {
            session: Session {
                id,
                agent_name: "support-bot".into(),
                workspace: "acme".into(),
                created_at: Utc::now(),
                message_count: 0,
                tags: vec!["archived-test".into()],
                state: SessionState::Closed,
                user_id: None,
            },
            messages: vec![],
            eval_results: vec![],
        }
    }

    fn archive() -> ObjectStoreArchive {
        ObjectStoreArchive::new(Arc::new(InMemory::new()), Some("converge".into()))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let archive = archive();
        let id = Uuid::now_v7();
        archive.archive_session(&export(id)).await.unwrap();

        let fetched = archive.fetch_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.session.id, id);
        assert_eq!(fetched.session.tags, vec!["archived-test".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let archive = archive();
        assert!(archive.fetch_session(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let archive = archive();
        let id = Uuid::now_v7();
        archive.archive_session(&export(id)).await.unwrap();
        archive.purge_session(id).await.unwrap();
        archive.purge_session(id).await.unwrap();
        assert!(archive.fetch_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing() {
        let archive = archive();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        archive.archive_session(&export(a)).await.unwrap();
        archive.archive_session(&export(b)).await.unwrap();

        let mut ids: Vec<Uuid> = archive
            .list_archived()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.session_id)
            .collect();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
