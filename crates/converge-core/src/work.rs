// Work-queue item and job-progress types for the Arena engine.
//
// A WorkItem is one scenario × provider combination; a job owns its items.
// Items move pending → processing → completed | failed, and an item is in
// exactly one of those buckets at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status bucket of a work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItemStatus::Pending => write!(f, "pending"),
            WorkItemStatus::Processing => write!(f, "processing"),
            WorkItemStatus::Completed => write!(f, "completed"),
            WorkItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One dispatchable unit of Arena work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Deterministic per-combination id (`<scenario>@<provider>`)
    pub id: String,
    pub job_id: String,
    pub scenario_id: String,
    pub provider_id: String,
    /// Location of the materialized bundle the worker should load
    pub bundle_url: String,
    /// Opaque per-item config (engine overrides, fleet endpoint, ...)
    #[serde(default)]
    pub config: serde_json::Value,
    pub status: WorkItemStatus,
    /// Number of deliveries that ended in Nack
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkItem {
    /// Build a fresh pending item for one scenario × provider combination.
    pub fn new(
        job_id: impl Into<String>,
        scenario_id: impl Into<String>,
        provider_id: impl Into<String>,
        bundle_url: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let scenario_id = scenario_id.into();
        let provider_id = provider_id.into();
        Self {
            id: format!("{scenario_id}@{provider_id}"),
            job_id: job_id.into(),
            scenario_id,
            provider_id,
            bundle_url: bundle_url.into(),
            config: serde_json::Value::Null,
            status: WorkItemStatus::Pending,
            attempt: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Derived counts and timing for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// A job is complete once nothing is pending or in flight.
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

/// Pass/fail outcome of one work-item execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pass,
    Fail,
}

/// Per-execution counters reported by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    pub runs_executed: u64,
    pub runs_passed: u64,
    pub runs_failed: u64,
    pub total_duration_ms: u64,
}

/// One named assertion outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: String,
}

/// Result of executing one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    /// Conversation transcript, reported by fleet-mode executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// A passing result with zero runs (empty plan).
    pub fn empty_pass() -> Self {
        Self {
            status: ExecutionStatus::Pass,
            duration_ms: 0,
            error: None,
            metrics: ExecutionMetrics::default(),
            assertions: vec![],
            transcript: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Fail,
            duration_ms,
            error: Some(error.into()),
            metrics: ExecutionMetrics::default(),
            assertions: vec![],
            transcript: None,
        }
    }

    /// Recompute status from assertions: any non-passing assertion forces fail.
    pub fn finalize(mut self) -> Self {
        if self.assertions.iter().any(|a| !a.passed) {
            self.status = ExecutionStatus::Fail;
        }
        self
    }
}
