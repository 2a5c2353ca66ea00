// Cron scheduling for recurring jobs.

use chrono::{DateTime, Utc};
use converge_core::{CoreError, Result};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What to do when a scheduled run comes due while a previous run is
/// still active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConcurrencyPolicy {
    /// Run anyway, side by side
    Allow,
    /// Skip this occurrence
    #[default]
    Forbid,
    /// Cancel the active run and start fresh
    Replace,
}

/// Decision for one due occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDecision {
    Start,
    Skip,
    ReplaceActive,
}

/// Next fire time strictly after `after`.
pub fn next_run(cron_expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(cron_expr)
        .map_err(|e| CoreError::validation(format!("invalid cron expression {cron_expr:?}: {e}")))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| CoreError::validation(format!("cron {cron_expr:?} never fires")))
}

/// Apply the concurrency policy to a due occurrence.
pub fn decide(policy: ConcurrencyPolicy, run_active: bool) -> RunDecision {
    match (policy, run_active) {
        (_, false) => RunDecision::Start,
        (ConcurrencyPolicy::Allow, true) => RunDecision::Start,
        (ConcurrencyPolicy::Forbid, true) => RunDecision::Skip,
        (ConcurrencyPolicy::Replace, true) => RunDecision::ReplaceActive,
    }
}
