// Storage registry: immutable post-init composition of the configured
// tiers, shared by reference across all Session API callers.
//
// Read path is hot → warm → cold with first hit winning; a cold hit is
// rehydrated into warm only when the record's age still places it in the
// warm window under the active retention policy. Writes always linearize
// on warm; hot is best-effort write-through; cold is written only by the
// retention sweeper.

use std::sync::Arc;

use chrono::Utc;
use converge_core::{CoreError, Result, RetentionPolicy};
use uuid::Uuid;

use crate::cold::ColdArchive;
use crate::hot::HotCache;
use crate::warm::{SessionExport, WarmStore};

/// Tiered storage composition. Construct once at startup via
/// [`crate::build_registry`] and share by `Arc`.
pub struct StorageRegistry {
    warm: Option<Arc<dyn WarmStore>>,
    hot: Option<Arc<dyn HotCache>>,
    cold: Option<Arc<dyn ColdArchive>>,
}

impl StorageRegistry {
    pub fn new(
        warm: Option<Arc<dyn WarmStore>>,
        hot: Option<Arc<dyn HotCache>>,
        cold: Option<Arc<dyn ColdArchive>>,
    ) -> Self {
        Self { warm, hot, cold }
    }

    /// The warm tier, or a fatal NotConfigured error. Callers that can
    /// degrade should check [`Self::has_warm`] instead.
    pub fn warm(&self) -> Result<Arc<dyn WarmStore>> {
        self.warm
            .clone()
            .ok_or_else(|| CoreError::fatal("warm store not configured"))
    }

    pub fn hot(&self) -> Result<Arc<dyn HotCache>> {
        self.hot
            .clone()
            .ok_or_else(|| CoreError::fatal("hot cache not configured"))
    }

    pub fn cold(&self) -> Result<Arc<dyn ColdArchive>> {
        self.cold
            .clone()
            .ok_or_else(|| CoreError::fatal("cold archive not configured"))
    }

    pub fn has_warm(&self) -> bool {
        self.warm.is_some()
    }

    pub fn has_hot(&self) -> bool {
        self.hot.is_some()
    }

    pub fn has_cold(&self) -> bool {
        self.cold.is_some()
    }

    /// Durable read across warm then cold; the hot tier is consulted by
    /// the caller because it holds read-ready (decrypted) views.
    ///
    /// On a cold hit the bundle is rehydrated into warm when the effective
    /// policy (resolved from `policies` against the record's agent) still
    /// places a record of that age in the warm window.
    pub async fn load_session(
        &self,
        id: Uuid,
        policies: &[RetentionPolicy],
    ) -> Result<Option<SessionExport>> {
        if let Some(warm) = &self.warm {
            if let Some(export) = warm.export_session(id).await? {
                return Ok(Some(export));
            }
        }
        let Some(cold) = &self.cold else {
            return Ok(None);
        };
        let Some(export) = cold.fetch_session(id).await? else {
            return Ok(None);
        };
        let effective = RetentionPolicy::resolve_effective(
            policies,
            &export.session.workspace,
            &export.session.agent_name,
        );
        if let (Some(warm), Some(policy)) = (&self.warm, effective) {
            let age_days = (Utc::now() - export.session.created_at).num_days();
            if age_days >= 0 && (age_days as u32) < policy.warm_days {
                if let Err(e) = warm.import_session(export.clone()).await {
                    tracing::warn!(sessionId = %id, error = %e, "cold rehydration failed");
                }
            }
        }
        Ok(Some(export))
    }

    /// Drop a session from every configured tier. Used by erasure and by
    /// the delete cascade. Hot and cold absences are not errors.
    pub async fn delete_everywhere(&self, id: Uuid) -> Result<bool> {
        let mut existed = false;
        if let Some(warm) = &self.warm {
            existed |= warm.delete_session(id).await?;
        }
        if let Some(hot) = &self.hot {
            if let Err(e) = hot.delete(id).await {
                tracing::warn!(sessionId = %id, error = %e, "hot delete failed");
            }
        }
        if let Some(cold) = &self.cold {
            if cold.fetch_session(id).await?.is_some() {
                existed = true;
            }
            cold.purge_session(id).await?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cold::ObjectStoreArchive;
    use crate::warm::MemoryWarmStore;
    use chrono::Duration;
    use converge_core::{Session, SessionState};
    use object_store::memory::InMemory;

    fn session_aged(days: i64) -> Session {
        Session {
            id: Uuid::now_v7(),
            agent_name: "support-bot".into(),
            workspace: "acme".into(),
            created_at: Utc::now() - Duration::days(days),
            message_count: 0,
            tags: vec![],
            state: SessionState::Closed,
            user_id: None,
        }
    }

    fn registry_with_cold() -> (StorageRegistry, Arc<dyn WarmStore>, Arc<dyn ColdArchive>) {
        let warm: Arc<dyn WarmStore> = Arc::new(MemoryWarmStore::new());
        let cold: Arc<dyn ColdArchive> =
            Arc::new(ObjectStoreArchive::new(Arc::new(InMemory::new()), None));
        let registry = StorageRegistry::new(Some(warm.clone()), None, Some(cold.clone()));
        (registry, warm, cold)
    }

    #[tokio::test]
    async fn test_not_configured_accessors() {
        let registry = StorageRegistry::new(None, None, None);
        assert!(matches!(registry.warm().unwrap_err(), CoreError::Fatal(_)));
        assert!(matches!(registry.hot().unwrap_err(), CoreError::Fatal(_)));
        assert!(matches!(registry.cold().unwrap_err(), CoreError::Fatal(_)));
        assert!(!registry.has_warm());
    }

    #[tokio::test]
    async fn test_warm_hit_wins() {
        let (registry, warm, _cold) = registry_with_cold();
        let session = session_aged(0);
        let id = session.id;
        warm.create_session(session).await.unwrap();

        let export = registry.load_session(id, &[]).await.unwrap().unwrap();
        assert_eq!(export.session.id, id);
    }

    #[tokio::test]
    async fn test_cold_hit_without_rehydration_when_aged_out() {
        let (registry, warm, cold) = registry_with_cold();
        let session = session_aged(40);
        let id = session.id;
        cold.archive_session(&SessionExport {
            session,
            messages: vec![],
            eval_results: vec![],
        })
        .await
        .unwrap();

        let policy = RetentionPolicy::global(30, 365, 1095);
        let export = registry
            .load_session(id, &[policy])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(export.session.id, id);
        // 40 days old under warmDays=30: stays cold-only
        assert!(warm.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cold_hit_rehydrates_young_record() {
        let (registry, warm, cold) = registry_with_cold();
        // A record the policy still considers warm (e.g. the policy was
        // relaxed after an aggressive sweep)
        let session = session_aged(5);
        let id = session.id;
        cold.archive_session(&SessionExport {
            session,
            messages: vec![],
            eval_results: vec![],
        })
        .await
        .unwrap();

        let policy = RetentionPolicy::global(30, 365, 1095);
        registry
            .load_session(id, &[policy])
            .await
            .unwrap()
            .unwrap();
        assert!(warm.get_session(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_everywhere() {
        let (registry, warm, cold) = registry_with_cold();
        let session = session_aged(0);
        let id = session.id;
        warm.create_session(session.clone()).await.unwrap();
        cold.archive_session(&SessionExport {
            session,
            messages: vec![],
            eval_results: vec![],
        })
        .await
        .unwrap();

        assert!(registry.delete_everywhere(id).await.unwrap());
        assert!(warm.get_session(id).await.unwrap().is_none());
        assert!(cold.fetch_session(id).await.unwrap().is_none());
    }
}
