// In-memory queue backend.
//
// Development and test backend with the same semantics as the Redis
// implementation. All transitions happen under one job-level write lock,
// which gives the exactly-one-bucket invariant for free.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{
    CoreError, ExecutionResult, JobProgress, Result, WorkItem, WorkItemStatus,
};
use parking_lot::RwLock;

use crate::{QueuePolicy, WorkQueue};

struct JobState {
    /// FIFO of pending item ids
    pending: VecDeque<String>,
    items: HashMap<String, WorkItem>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            items: HashMap::new(),
            started_at: None,
            completed_at: None,
        }
    }

    fn progress(&self) -> JobProgress {
        let mut progress = JobProgress {
            total: self.items.len() as u64,
            started_at: self.started_at,
            completed_at: self.completed_at,
            ..Default::default()
        };
        for item in self.items.values() {
            match item.status {
                WorkItemStatus::Pending => progress.pending += 1,
                WorkItemStatus::Processing => progress.processing += 1,
                WorkItemStatus::Completed => progress.completed += 1,
                WorkItemStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }

    fn stamp_completion(&mut self) {
        let progress = self.progress();
        if progress.is_complete() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// In-memory implementation of [`WorkQueue`].
pub struct MemoryWorkQueue {
    jobs: RwLock<HashMap<String, JobState>>,
    policy: QueuePolicy,
}

impl MemoryWorkQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Number of pending items across all jobs (test helper).
    pub fn pending_count(&self) -> usize {
        self.jobs
            .read()
            .values()
            .map(|j| j.pending.len())
            .sum()
    }
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.entry(job_id.to_string()).or_insert_with(JobState::new);
        for mut item in items {
            item.job_id = job_id.to_string();
            item.status = WorkItemStatus::Pending;
            item.attempt = 0;
            item.max_attempts = self.policy.max_attempts;
            item.started_at = None;
            item.completed_at = None;
            job.pending.push_back(item.id.clone());
            job.items.insert(item.id.clone(), item);
        }
        Ok(())
    }

    async fn pop(&self, job_id: &str) -> Result<WorkItem> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or(CoreError::QueueEmpty)?;
        let item_id = job.pending.pop_front().ok_or(CoreError::QueueEmpty)?;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        let item = job
            .items
            .get_mut(&item_id)
            .ok_or_else(|| CoreError::not_found(format!("work item {item_id}")))?;
        item.status = WorkItemStatus::Processing;
        item.started_at = Some(Utc::now());
        Ok(item.clone())
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: ExecutionResult) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job {job_id}")))?;
        let item = job
            .items
            .get_mut(item_id)
            .ok_or_else(|| CoreError::not_found(format!("work item {item_id}")))?;
        item.status = WorkItemStatus::Completed;
        item.completed_at = Some(Utc::now());
        item.result = Some(result);
        job.stamp_completion();
        Ok(())
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job {job_id}")))?;
        let item = job
            .items
            .get_mut(item_id)
            .ok_or_else(|| CoreError::not_found(format!("work item {item_id}")))?;

        item.attempt += 1;
        item.error = Some(error.to_string());
        if item.attempt < item.max_attempts {
            item.status = WorkItemStatus::Pending;
            item.started_at = None;
            job.pending.push_back(item.id.clone());
        } else {
            item.status = WorkItemStatus::Failed;
            item.completed_at = Some(Utc::now());
        }
        job.stamp_completion();
        Ok(())
    }

    async fn progress(&self, job_id: &str) -> Result<JobProgress> {
        let jobs = self.jobs.read();
        Ok(jobs
            .get(job_id)
            .map(|j| j.progress())
            .unwrap_or_default())
    }

    async fn reclaim_expired(&self, job_id: &str) -> Result<Vec<String>> {
        let deadline = Utc::now()
            - chrono::Duration::from_std(self.policy.visibility_timeout)
                .map_err(|e| CoreError::fatal(format!("visibility timeout out of range: {e}")))?;
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(vec![]);
        };
        let mut reclaimed = vec![];
        for item in job.items.values_mut() {
            if item.status == WorkItemStatus::Processing {
                if let Some(started) = item.started_at {
                    if started < deadline {
                        item.status = WorkItemStatus::Pending;
                        item.started_at = None;
                        reclaimed.push(item.id.clone());
                    }
                }
            }
        }
        for id in &reclaimed {
            job.pending.push_back(id.clone());
        }
        Ok(reclaimed)
    }

    async fn get_item(&self, job_id: &str, item_id: &str) -> Result<WorkItem> {
        let jobs = self.jobs.read();
        jobs.get(job_id)
            .and_then(|j| j.items.get(item_id))
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("work item {item_id}")))
    }

    async fn list_items(
        &self,
        job_id: &str,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>> {
        let jobs = self.jobs.read();
        let Some(job) = jobs.get(job_id) else {
            return Ok(vec![]);
        };
        let mut items: Vec<WorkItem> = job
            .items
            .values()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}
