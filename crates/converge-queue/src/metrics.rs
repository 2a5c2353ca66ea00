// Instrumented queue decorator.
//
// Wraps any WorkQueue and counts pushes/pops/acks/nacks, operation
// durations, retries, and per-status item gauges against an injected
// prometheus registry. The wrapped backend stays oblivious.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use converge_core::{
    CoreError, ExecutionResult, JobProgress, Result, WorkItem, WorkItemStatus,
};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::WorkQueue;

/// Prometheus instruments for queue traffic.
#[derive(Clone)]
pub struct QueueMetrics {
    pub operations: IntCounterVec,
    pub operation_duration: HistogramVec,
    pub retries: IntCounterVec,
    pub items: IntGaugeVec,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            operations: IntCounterVec::new(
                Opts::new("queue_operations_total", "Queue operations by kind and job"),
                &["op", "job"],
            )
            .unwrap(),
            operation_duration: HistogramVec::new(
                HistogramOpts::new(
                    "queue_operation_duration_seconds",
                    "Latency of queue operations",
                )
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
                &["op"],
            )
            .unwrap(),
            retries: IntCounterVec::new(
                Opts::new("queue_retries_total", "Nacks that requeued an item"),
                &["job"],
            )
            .unwrap(),
            items: IntGaugeVec::new(
                Opts::new("queue_items", "Items per job by status"),
                &["job", "status"],
            )
            .unwrap(),
        }
    }

    /// Register all instruments with the given registry.
    pub fn register(self, registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        registry.register(Box::new(self.operations.clone()))?;
        registry.register(Box::new(self.operation_duration.clone()))?;
        registry.register(Box::new(self.retries.clone()))?;
        registry.register(Box::new(self.items.clone()))?;
        Ok(self)
    }

    fn observe_progress(&self, job_id: &str, progress: &JobProgress) {
        self.items
            .with_label_values(&[job_id, "pending"])
            .set(progress.pending as i64);
        self.items
            .with_label_values(&[job_id, "processing"])
            .set(progress.processing as i64);
        self.items
            .with_label_values(&[job_id, "completed"])
            .set(progress.completed as i64);
        self.items
            .with_label_values(&[job_id, "failed"])
            .set(progress.failed as i64);
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// [`WorkQueue`] decorator that records metrics around every call.
pub struct RecordingWorkQueue {
    inner: Arc<dyn WorkQueue>,
    metrics: QueueMetrics,
}

impl RecordingWorkQueue {
    pub fn new(inner: Arc<dyn WorkQueue>, metrics: QueueMetrics) -> Self {
        Self { inner, metrics }
    }

    async fn refresh_gauges(&self, job_id: &str) {
        if let Ok(progress) = self.inner.progress(job_id).await {
            self.metrics.observe_progress(job_id, &progress);
        }
    }
}

#[async_trait]
impl WorkQueue for RecordingWorkQueue {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.push(job_id, items).await;
        self.metrics
            .operations
            .with_label_values(&["push", job_id])
            .inc();
        self.metrics
            .operation_duration
            .with_label_values(&["push"])
            .observe(start.elapsed().as_secs_f64());
        self.refresh_gauges(job_id).await;
        result
    }

    async fn pop(&self, job_id: &str) -> Result<WorkItem> {
        let start = Instant::now();
        let result = self.inner.pop(job_id).await;
        // Empty pops are an expected signal; count real deliveries only
        if !matches!(result, Err(CoreError::QueueEmpty)) {
            self.metrics
                .operations
                .with_label_values(&["pop", job_id])
                .inc();
        }
        self.metrics
            .operation_duration
            .with_label_values(&["pop"])
            .observe(start.elapsed().as_secs_f64());
        self.refresh_gauges(job_id).await;
        result
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: ExecutionResult) -> Result<()> {
        let start = Instant::now();
        let out = self.inner.ack(job_id, item_id, result).await;
        self.metrics
            .operations
            .with_label_values(&["ack", job_id])
            .inc();
        self.metrics
            .operation_duration
            .with_label_values(&["ack"])
            .observe(start.elapsed().as_secs_f64());
        self.refresh_gauges(job_id).await;
        out
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: &str) -> Result<()> {
        let start = Instant::now();
        let out = self.inner.nack(job_id, item_id, error).await;
        self.metrics
            .operations
            .with_label_values(&["nack", job_id])
            .inc();
        if let Ok(item) = self.inner.get_item(job_id, item_id).await {
            if item.status == WorkItemStatus::Pending {
                self.metrics.retries.with_label_values(&[job_id]).inc();
            }
        }
        self.metrics
            .operation_duration
            .with_label_values(&["nack"])
            .observe(start.elapsed().as_secs_f64());
        self.refresh_gauges(job_id).await;
        out
    }

    async fn progress(&self, job_id: &str) -> Result<JobProgress> {
        let progress = self.inner.progress(job_id).await?;
        self.metrics.observe_progress(job_id, &progress);
        Ok(progress)
    }

    async fn reclaim_expired(&self, job_id: &str) -> Result<Vec<String>> {
        let reclaimed = self.inner.reclaim_expired(job_id).await?;
        if !reclaimed.is_empty() {
            self.metrics
                .operations
                .with_label_values(&["reclaim", job_id])
                .inc_by(reclaimed.len() as u64);
        }
        self.refresh_gauges(job_id).await;
        Ok(reclaimed)
    }

    async fn get_item(&self, job_id: &str, item_id: &str) -> Result<WorkItem> {
        self.inner.get_item(job_id, item_id).await
    }

    async fn list_items(
        &self,
        job_id: &str,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>> {
        self.inner.list_items(job_id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryWorkQueue;

    #[tokio::test]
    async fn test_counts_and_gauges() {
        let registry = Registry::new();
        let metrics = QueueMetrics::new().register(&registry).unwrap();
        let queue = RecordingWorkQueue::new(
            Arc::new(MemoryWorkQueue::default()),
            metrics.clone(),
        );

        queue
            .push(
                "job-1",
                vec![
                    WorkItem::new("job-1", "s1", "p1", "file:///b", 3),
                    WorkItem::new("job-1", "s2", "p1", "file:///b", 3),
                ],
            )
            .await
            .unwrap();
        let item = queue.pop("job-1").await.unwrap();
        queue
            .ack("job-1", &item.id, ExecutionResult::empty_pass())
            .await
            .unwrap();

        assert_eq!(
            metrics.operations.with_label_values(&["push", "job-1"]).get(),
            1
        );
        assert_eq!(
            metrics.operations.with_label_values(&["pop", "job-1"]).get(),
            1
        );
        assert_eq!(
            metrics.operations.with_label_values(&["ack", "job-1"]).get(),
            1
        );
        assert_eq!(
            metrics.items.with_label_values(&["job-1", "pending"]).get(),
            1
        );
        assert_eq!(
            metrics
                .items
                .with_label_values(&["job-1", "completed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_empty_pop_not_counted_as_delivery() {
        let registry = Registry::new();
        let metrics = QueueMetrics::new().register(&registry).unwrap();
        let queue =
            RecordingWorkQueue::new(Arc::new(MemoryWorkQueue::default()), metrics.clone());

        let err = queue.pop("job-x").await.unwrap_err();
        assert!(matches!(err, CoreError::QueueEmpty));
        assert_eq!(
            metrics.operations.with_label_values(&["pop", "job-x"]).get(),
            0
        );
    }

    #[tokio::test]
    async fn test_retry_counter() {
        let registry = Registry::new();
        let metrics = QueueMetrics::new().register(&registry).unwrap();
        let queue =
            RecordingWorkQueue::new(Arc::new(MemoryWorkQueue::default()), metrics.clone());

        queue
            .push(
                "job-1",
                vec![WorkItem::new("job-1", "s1", "p1", "file:///b", 3)],
            )
            .await
            .unwrap();
        let item = queue.pop("job-1").await.unwrap();
        queue.nack("job-1", &item.id, "boom").await.unwrap();

        assert_eq!(metrics.retries.with_label_values(&["job-1"]).get(), 1);
    }
}
