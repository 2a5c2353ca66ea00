// Retention policy model and effective-policy resolution.
//
// Policies tier session data down over time: rows older than `warm_days`
// move to the cold archive, archives older than `purge_after_days` are
// deleted. A more specific scope always wins: agent > workspace > global.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Where a policy applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum PolicyScope {
    Global,
    Workspace { workspace: String },
    Agent { workspace: String, agent: String },
}

impl PolicyScope {
    /// Specificity rank; higher wins during resolution.
    pub fn specificity(&self) -> u8 {
        match self {
            PolicyScope::Global => 0,
            PolicyScope::Workspace { .. } => 1,
            PolicyScope::Agent { .. } => 2,
        }
    }

    /// Whether this scope covers the given agent.
    pub fn matches(&self, workspace: &str, agent: &str) -> bool {
        match self {
            PolicyScope::Global => true,
            PolicyScope::Workspace { workspace: w } => w == workspace,
            PolicyScope::Agent {
                workspace: w,
                agent: a,
            } => w == workspace && a == agent,
        }
    }
}

/// Tier thresholds in days. Invariant: warm ≤ cold ≤ purge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    #[serde(flatten)]
    pub scope: PolicyScope,
    pub warm_days: u32,
    pub cold_days: u32,
    pub purge_after_days: u32,
}

impl RetentionPolicy {
    pub fn global(warm_days: u32, cold_days: u32, purge_after_days: u32) -> Self {
        Self {
            scope: PolicyScope::Global,
            warm_days,
            cold_days,
            purge_after_days,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.warm_days > self.cold_days {
            return Err(CoreError::validation(format!(
                "warmDays ({}) must not exceed coldDays ({})",
                self.warm_days, self.cold_days
            )));
        }
        if self.cold_days > self.purge_after_days {
            return Err(CoreError::validation(format!(
                "coldDays ({}) must not exceed purgeAfterDays ({})",
                self.cold_days, self.purge_after_days
            )));
        }
        Ok(())
    }

    /// Resolve the effective policy for one agent from all known policies.
    ///
    /// Among the policies whose scope covers the agent, the most specific
    /// wins; ties go to the first seen. Returns `None` when nothing applies.
    pub fn resolve_effective<'a>(
        policies: impl IntoIterator<Item = &'a RetentionPolicy>,
        workspace: &str,
        agent: &str,
    ) -> Option<&'a RetentionPolicy> {
        policies
            .into_iter()
            .filter(|p| p.scope.matches(workspace, agent))
            .max_by_key(|p| p.scope.specificity())
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::global(30, 365, 1095)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ordering() {
        assert!(RetentionPolicy::global(30, 365, 1095).validate().is_ok());
        assert!(RetentionPolicy::global(30, 30, 30).validate().is_ok());
        assert!(RetentionPolicy::global(40, 30, 90).validate().is_err());
        assert!(RetentionPolicy::global(10, 90, 60).validate().is_err());
    }

    #[test]
    fn test_specificity_resolution() {
        let global = RetentionPolicy::global(30, 365, 1095);
        let workspace = RetentionPolicy {
            scope: PolicyScope::Workspace {
                workspace: "acme".into(),
            },
            warm_days: 14,
            cold_days: 180,
            purge_after_days: 365,
        };
        let agent = RetentionPolicy {
            scope: PolicyScope::Agent {
                workspace: "acme".into(),
                agent: "support-bot".into(),
            },
            warm_days: 7,
            cold_days: 30,
            purge_after_days: 90,
        };
        let policies = vec![global.clone(), workspace.clone(), agent.clone()];

        let effective =
            RetentionPolicy::resolve_effective(&policies, "acme", "support-bot").unwrap();
        assert_eq!(effective.warm_days, 7);

        let effective =
            RetentionPolicy::resolve_effective(&policies, "acme", "sales-bot").unwrap();
        assert_eq!(effective.warm_days, 14);

        let effective =
            RetentionPolicy::resolve_effective(&policies, "other", "any").unwrap();
        assert_eq!(effective.warm_days, 30);
    }

    #[test]
    fn test_no_applicable_policy() {
        let workspace_only = RetentionPolicy {
            scope: PolicyScope::Workspace {
                workspace: "acme".into(),
            },
            warm_days: 14,
            cold_days: 180,
            purge_after_days: 365,
        };
        assert!(
            RetentionPolicy::resolve_effective([&workspace_only], "other", "bot").is_none()
        );
    }
}
