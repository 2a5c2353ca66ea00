// Status conditions shared by every reconciled kind.
//
// `observed_generation` is monotonic; `last_transition_time` bumps iff the
// status value changes; messages are capped at 1024 characters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum condition message length, including the ellipsis.
pub const MAX_MESSAGE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One observation about an object, in the Kubernetes condition shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: truncate_message(&message.into()),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Cap a message at [`MAX_MESSAGE_LEN`] with an ellipsis, on a char
/// boundary.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let truncated: String = message.chars().take(MAX_MESSAGE_LEN - 1).collect();
    format!("{truncated}…")
}

/// Merge a freshly computed condition into the list.
///
/// Keeps the previous `last_transition_time` when the status is unchanged
/// and refuses to move `observed_generation` backwards.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut incoming: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == incoming.condition_type)
    {
        Some(existing) => {
            if existing.observed_generation > incoming.observed_generation {
                // A newer observation already landed; never regress
                return;
            }
            if existing.status == incoming.status {
                incoming.last_transition_time = existing.last_transition_time;
            }
            *existing = incoming;
        }
        None => conditions.push(incoming),
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(status: ConditionStatus, generation: i64) -> Condition {
        Condition::new("Ready", status, "Test", "message", generation)
    }

    #[test]
    fn test_transition_time_bumps_only_on_status_change() {
        let mut conditions = vec![];
        upsert_condition(&mut conditions, condition(ConditionStatus::False, 1));
        let first_transition = conditions[0].last_transition_time;

        std::thread::sleep(std::time::Duration::from_millis(5));
        // Same status, newer generation: transition time preserved
        upsert_condition(&mut conditions, condition(ConditionStatus::False, 2));
        assert_eq!(conditions[0].last_transition_time, first_transition);
        assert_eq!(conditions[0].observed_generation, 2);

        std::thread::sleep(std::time::Duration::from_millis(5));
        // Status flip: transition time moves
        upsert_condition(&mut conditions, condition(ConditionStatus::True, 3));
        assert!(conditions[0].last_transition_time > first_transition);
    }

    #[test]
    fn test_observed_generation_is_monotonic() {
        let mut conditions = vec![];
        upsert_condition(&mut conditions, condition(ConditionStatus::True, 5));
        // A stale observation must not regress the recorded generation
        upsert_condition(&mut conditions, condition(ConditionStatus::False, 3));
        assert_eq!(conditions[0].observed_generation, 5);
        assert!(conditions[0].is_true());
    }

    #[test]
    fn test_message_truncation() {
        let long = "x".repeat(5000);
        let capped = truncate_message(&long);
        assert_eq!(capped.chars().count(), MAX_MESSAGE_LEN);
        assert!(capped.ends_with('…'));

        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn test_distinct_types_coexist() {
        let mut conditions = vec![];
        upsert_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::False, "Init", "", 1),
        );
        upsert_condition(
            &mut conditions,
            Condition::new("ProviderBound", ConditionStatus::True, "Resolved", "", 1),
        );
        assert_eq!(conditions.len(), 2);
        assert!(get_condition(&conditions, "ProviderBound").unwrap().is_true());
        assert!(!get_condition(&conditions, "Ready").unwrap().is_true());
        assert!(get_condition(&conditions, "PackContentValid").is_none());
    }
}
