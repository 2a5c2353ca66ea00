// Consent and erasure: per-user opt-out toggles and GDPR-style deletion
// requests. Opt-out blocks future recording; deletion requests are
// enqueued here and fulfilled across tiers by the retention sweeper
// within the configured window. Everything is audit-logged.

use std::sync::Arc;

use chrono::{Duration, Utc};
use converge_core::{CoreError, Result};
use uuid::Uuid;

use crate::warm::{AuditEntry, DeletionRequest, PrivacyPreference, WarmStore};

/// Consent operations over the warm store.
#[derive(Clone)]
pub struct ConsentService {
    warm: Arc<dyn WarmStore>,
}

impl ConsentService {
    pub fn new(warm: Arc<dyn WarmStore>) -> Self {
        Self { warm }
    }

    /// Record a user's opt-out choice.
    pub async fn set_opt_out(&self, user_id: &str, opted_out: bool) -> Result<()> {
        self.warm
            .set_privacy_preference(PrivacyPreference {
                user_id: user_id.to_string(),
                opted_out,
                updated_at: Utc::now(),
            })
            .await?;
        self.warm
            .append_audit(AuditEntry::new(
                "privacy.optOutChanged",
                user_id,
                serde_json::json!({ "optedOut": opted_out }),
            ))
            .await
    }

    pub async fn is_opted_out(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .warm
            .get_privacy_preference(user_id)
            .await?
            .map(|p| p.opted_out)
            .unwrap_or(false))
    }

    /// Reject recording for opted-out users. Callers without a known user
    /// pass `None` and are always allowed.
    pub async fn ensure_recording_allowed(&self, user_id: Option<&str>) -> Result<()> {
        if let Some(user_id) = user_id {
            if self.is_opted_out(user_id).await? {
                return Err(CoreError::policy_denied(format!(
                    "user {user_id} has opted out of recording"
                )));
            }
        }
        Ok(())
    }

    /// Enqueue erasure of one session, due within `delete_within_days`.
    pub async fn request_erasure(
        &self,
        session_id: Uuid,
        requested_by: &str,
        delete_within_days: u32,
    ) -> Result<DeletionRequest> {
        let now = Utc::now();
        let request = DeletionRequest {
            id: Uuid::now_v7(),
            session_id,
            requested_by: requested_by.to_string(),
            requested_at: now,
            due_at: now + Duration::days(i64::from(delete_within_days)),
            fulfilled_at: None,
        };
        self.warm.enqueue_deletion_request(request.clone()).await?;
        self.warm
            .append_audit(AuditEntry::new(
                "privacy.erasureRequested",
                session_id.to_string(),
                serde_json::json!({
                    "requestedBy": requested_by,
                    "dueAt": request.due_at.to_rfc3339(),
                }),
            ))
            .await?;
        Ok(request)
    }
}
