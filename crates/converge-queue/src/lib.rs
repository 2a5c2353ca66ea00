// Distributed work queue for Arena jobs.
//
// At-least-once delivery: a popped item is owned by its worker for the
// visibility timeout; if the worker vanishes, the sweeper reclaims the item
// back to pending without counting a retry. Consumers must be idempotent.

pub mod memory;
pub mod metrics;
pub mod redis_queue;
pub mod sweeper;

use std::time::Duration;

use async_trait::async_trait;
use converge_core::{JobProgress, Result, WorkItem, WorkItemStatus};

pub use memory::MemoryWorkQueue;
pub use metrics::{QueueMetrics, RecordingWorkQueue};
pub use redis_queue::RedisWorkQueue;
pub use sweeper::VisibilitySweeper;

/// Delivery policy applied when items are pushed.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Nacks before an item is marked failed
    pub max_attempts: u32,
    /// Ownership window for a popped item
    pub visibility_timeout: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// Capability interface over a queue backend.
///
/// Implementations must keep every item in exactly one status bucket at
/// any time and make `ack` results durable before returning.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Append items to the job's pending list.
    ///
    /// Each item is reset to `pending` with `attempt = 0` and the policy's
    /// `max_attempts`, regardless of what the caller stamped.
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> Result<()>;

    /// Atomically move one item from pending to processing and stamp
    /// `started_at`. Returns `CoreError::QueueEmpty` when nothing is
    /// pending.
    async fn pop(&self, job_id: &str) -> Result<WorkItem>;

    /// Mark a processing item completed and store its result durably.
    async fn ack(
        &self,
        job_id: &str,
        item_id: &str,
        result: converge_core::ExecutionResult,
    ) -> Result<()>;

    /// Record a failed delivery. Requeues to pending while attempts
    /// remain, otherwise marks the item failed with the error.
    async fn nack(&self, job_id: &str, item_id: &str, error: &str) -> Result<()>;

    /// Derived counts and timing for the job.
    async fn progress(&self, job_id: &str) -> Result<JobProgress>;

    /// Return processing items whose visibility window has expired to
    /// pending. Does not change `attempt`: reclaim is not a retry.
    /// Returns the reclaimed item ids.
    async fn reclaim_expired(&self, job_id: &str) -> Result<Vec<String>>;

    /// Fetch one item regardless of status.
    async fn get_item(&self, job_id: &str, item_id: &str) -> Result<WorkItem>;

    /// List a job's items, optionally filtered by status. Used by the
    /// aggregator after completion.
    async fn list_items(
        &self,
        job_id: &str,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>>;
}
