// Retention sweeper: policy-driven tiering and purge.
//
// Each pass is bounded and idempotent. Order matters: due erasures are
// fulfilled first (hard deadline), then archives past the purge window are
// deleted, then warm rows past their warm window move to the cold archive.
// Purging before archiving keeps a record archived in this pass from being
// purged in the same pass. Archive-then-delete makes replays safe:
// re-archiving simply overwrites the same object.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use converge_core::{Result, RetentionPolicy};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::StorageRegistry;
use crate::warm::AuditEntry;

/// Policies published by the retention-policy reconciler and read by the
/// sweeper. Shared by reference between the two.
pub type PolicyStore = Arc<RwLock<Vec<RetentionPolicy>>>;

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub archived: usize,
    pub purged: usize,
    pub erased: usize,
}

/// Periodic task tiering session data down across warm/cold.
pub struct RetentionSweeper {
    registry: Arc<StorageRegistry>,
    policies: PolicyStore,
    batch_size: i64,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<StorageRegistry>, policies: PolicyStore, batch_size: i64) -> Self {
        Self {
            registry,
            policies,
            batch_size: batch_size.max(1),
        }
    }

    /// One bounded sweep pass. Safe to replay: thresholds are time-based.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        self.fulfill_due_erasures(now, &mut report).await?;
        self.purge_expired_archives(now, &mut report).await?;
        self.archive_aged_sessions(now, &mut report).await?;
        if report != SweepReport::default() {
            info!(
                archived = report.archived,
                purged = report.purged,
                erased = report.erased,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    async fn fulfill_due_erasures(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if !self.registry.has_warm() {
            return Ok(());
        }
        let warm = self.registry.warm()?;
        for request in warm.due_deletion_requests(now).await? {
            self.registry.delete_everywhere(request.session_id).await?;
            warm.mark_deletion_fulfilled(request.id, now).await?;
            warm.append_audit(AuditEntry::new(
                "privacy.erasureFulfilled",
                request.session_id.to_string(),
                serde_json::json!({ "requestId": request.id }),
            ))
            .await?;
            report.erased += 1;
        }
        Ok(())
    }

    async fn archive_aged_sessions(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if !self.registry.has_warm() || !self.registry.has_cold() {
            return Ok(());
        }
        // Candidate cutoff: the tightest warm window any policy configures.
        // Per-session checks below apply the session's own effective policy.
        let min_warm_days = {
            let policies = self.policies.read();
            match policies.iter().map(|p| p.warm_days).min() {
                Some(days) => days,
                None => return Ok(()),
            }
        };
        let cutoff = now - chrono::Duration::days(i64::from(min_warm_days));

        let warm = self.registry.warm()?;
        let cold = self.registry.cold()?;
        let candidates = warm.sessions_older_than(cutoff, self.batch_size).await?;
        for session in candidates {
            let effective = {
                let policies = self.policies.read();
                RetentionPolicy::resolve_effective(
                    policies.iter(),
                    &session.workspace,
                    &session.agent_name,
                )
                .cloned()
            };
            let Some(policy) = effective else {
                continue;
            };
            let age_days = (now - session.created_at).num_days();
            if age_days < i64::from(policy.warm_days) {
                continue;
            }
            let Some(export) = warm.export_session(session.id).await? else {
                continue;
            };
            cold.archive_session(&export).await?;
            warm.delete_session(session.id).await?;
            if let Ok(hot) = self.registry.hot() {
                if let Err(e) = hot.delete(session.id).await {
                    warn!(sessionId = %session.id, error = %e, "hot eviction failed");
                }
            }
            debug!(sessionId = %session.id, ageDays = age_days, "session archived");
            report.archived += 1;
        }
        Ok(())
    }

    async fn purge_expired_archives(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        if !self.registry.has_cold() {
            return Ok(());
        }
        let cold = self.registry.cold()?;
        let mut inspected = 0i64;
        for entry in cold.list_archived().await? {
            if inspected >= self.batch_size {
                break;
            }
            inspected += 1;
            let Some(export) = cold.fetch_session(entry.session_id).await? else {
                continue;
            };
            let effective = {
                let policies = self.policies.read();
                RetentionPolicy::resolve_effective(
                    policies.iter(),
                    &export.session.workspace,
                    &export.session.agent_name,
                )
                .cloned()
            };
            let Some(policy) = effective else {
                continue;
            };
            let age_days = (now - export.session.created_at).num_days();
            if age_days >= i64::from(policy.purge_after_days) {
                cold.purge_session(entry.session_id).await?;
                debug!(sessionId = %entry.session_id, ageDays = age_days, "archive purged");
                report.purged += 1;
            }
        }
        Ok(())
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => return,
                }
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "retention sweep failed");
                }
            }
        });
        SweeperHandle {
            handle,
            shutdown_tx,
        }
    }
}

/// Handle to a running sweep loop.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cold::{ColdArchive, ObjectStoreArchive};
    use crate::warm::{MemoryWarmStore, MessageRecord, WarmStore};
    use chrono::Duration as ChronoDuration;
    use converge_core::{Message, MessageRole, Session, SessionState};
    use object_store::memory::InMemory;
    use uuid::Uuid;

    struct Fixture {
        registry: Arc<StorageRegistry>,
        warm: Arc<dyn WarmStore>,
        cold: Arc<dyn ColdArchive>,
        policies: PolicyStore,
    }

    fn fixture(policies: Vec<RetentionPolicy>) -> Fixture {
        let warm: Arc<dyn WarmStore> = Arc::new(MemoryWarmStore::new());
        let cold: Arc<dyn ColdArchive> =
            Arc::new(ObjectStoreArchive::new(Arc::new(InMemory::new()), None));
        let registry = Arc::new(StorageRegistry::new(
            Some(warm.clone()),
            None,
            Some(cold.clone()),
        ));
        Fixture {
            registry,
            warm,
            cold,
            policies: Arc::new(RwLock::new(policies)),
        }
    }

    async fn seed_session(warm: &Arc<dyn WarmStore>, age_days: i64) -> Uuid {
        let id = Uuid::now_v7();
        warm.create_session(Session {
            id,
            agent_name: "support-bot".into(),
            workspace: "acme".into(),
            created_at: Utc::now() - ChronoDuration::days(age_days),
            message_count: 0,
            tags: vec![],
            state: SessionState::Closed,
            user_id: None,
        })
        .await
        .unwrap();
        warm.append_message(MessageRecord::plaintext(Message {
            id: Uuid::now_v7(),
            session_id: id,
            role: MessageRole::User,
            content: "hello".into(),
            tool_call: None,
            tool_result: None,
            created_at: Utc::now() - ChronoDuration::days(age_days),
        }))
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_warm_aged_session_moves_to_cold_exactly_once() {
        let fx = fixture(vec![RetentionPolicy::global(30, 365, 1095)]);
        let aged = seed_session(&fx.warm, 40).await;
        let fresh = seed_session(&fx.warm, 3).await;

        let sweeper = RetentionSweeper::new(fx.registry.clone(), fx.policies.clone(), 100);
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.archived, 1);

        // Exactly one cold object, zero warm rows for the aged session
        assert!(fx.warm.get_session(aged).await.unwrap().is_none());
        let archived = fx.cold.fetch_session(aged).await.unwrap().unwrap();
        assert_eq!(archived.messages.len(), 1);
        // The fresh session stays warm
        assert!(fx.warm.get_session(fresh).await.unwrap().is_some());

        // Replaying the sweep is a no-op
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.archived, 0);

        // A read still returns the archived session (cold tier only)
        let export = fx.registry.load_session(aged, &[]).await.unwrap();
        assert!(export.is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_expired_archive() {
        let fx = fixture(vec![RetentionPolicy::global(30, 365, 1095)]);
        let ancient = seed_session(&fx.warm, 2000).await;

        let sweeper = RetentionSweeper::new(fx.registry.clone(), fx.policies.clone(), 100);
        // First pass archives, second pass purges the now-cold record
        sweeper.run_once().await.unwrap();
        assert!(fx.cold.fetch_session(ancient).await.unwrap().is_some());
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(fx.cold.fetch_session(ancient).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_policy_means_no_tiering() {
        let fx = fixture(vec![]);
        let aged = seed_session(&fx.warm, 400).await;
        let sweeper = RetentionSweeper::new(fx.registry.clone(), fx.policies.clone(), 100);
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(fx.warm.get_session(aged).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_agent_specific_policy_wins() {
        let fx = fixture(vec![
            RetentionPolicy::global(90, 365, 1095),
            RetentionPolicy {
                scope: converge_core::PolicyScope::Agent {
                    workspace: "acme".into(),
                    agent: "support-bot".into(),
                },
                warm_days: 7,
                cold_days: 30,
                purge_after_days: 90,
            },
        ]);
        // 10 days old: past the agent policy's warm window, inside global's
        let id = seed_session(&fx.warm, 10).await;
        let sweeper = RetentionSweeper::new(fx.registry.clone(), fx.policies.clone(), 100);
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.archived, 1);
        assert!(fx.warm.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_erasure_fulfilled_across_tiers() {
        let fx = fixture(vec![RetentionPolicy::global(30, 365, 1095)]);
        let id = seed_session(&fx.warm, 1).await;
        fx.warm
            .enqueue_deletion_request(crate::warm::DeletionRequest {
                id: Uuid::now_v7(),
                session_id: id,
                requested_by: "user-1".into(),
                requested_at: Utc::now() - ChronoDuration::days(31),
                due_at: Utc::now() - ChronoDuration::days(1),
                fulfilled_at: None,
            })
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(fx.registry.clone(), fx.policies.clone(), 100);
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.erased, 1);
        assert!(fx.warm.get_session(id).await.unwrap().is_none());
        assert!(fx
            .warm
            .due_deletion_requests(Utc::now())
            .await
            .unwrap()
            .is_empty());
        let audit = fx.warm.list_audit(&id.to_string()).await.unwrap();
        assert!(audit.iter().any(|e| e.action == "privacy.erasureFulfilled"));
    }
}
