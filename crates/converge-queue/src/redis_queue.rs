// Redis queue backend.
//
// Layout per job:
//   arena:{job}:pending     list of item ids (RPUSH on push, LMOVE on pop)
//   arena:{job}:processing  list of item ids owned by workers
//   arena:{job}:items       hash: item id -> WorkItem JSON
//   arena:{job}:deadlines   zset: item id scored by visibility deadline
//   arena:{job}:meta        hash: startedAt / completedAt
//
// The LMOVE from pending to processing is the atomic transition; item JSON
// carries the rest of the record. Ack/Nack LREM the processing list so an
// id can never sit in both lists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{
    CoreError, ExecutionResult, JobProgress, Result, WorkItem, WorkItemStatus,
};
use redis::aio::ConnectionManager;

use crate::{QueuePolicy, WorkQueue};

/// Redis-backed implementation of [`WorkQueue`].
#[derive(Clone)]
pub struct RedisWorkQueue {
    conn: ConnectionManager,
    policy: QueuePolicy,
}

impl RedisWorkQueue {
    pub fn new(conn: ConnectionManager, policy: QueuePolicy) -> Self {
        Self { conn, policy }
    }

    /// Connect and build a queue from a Redis URL.
    pub async fn connect(url: &str, policy: QueuePolicy) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::fatal(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::transient(format!("redis connect: {e}")))?;
        Ok(Self::new(conn, policy))
    }

    fn key(job_id: &str, suffix: &str) -> String {
        format!("arena:{job_id}:{suffix}")
    }

    async fn load_item(&self, job_id: &str, item_id: &str) -> Result<WorkItem> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(Self::key(job_id, "items"))
            .arg(item_id)
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        let raw = raw.ok_or_else(|| CoreError::not_found(format!("work item {item_id}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| CoreError::fatal(format!("corrupt work item {item_id}: {e}")))
    }

    async fn store_item(&self, item: &WorkItem) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(item)
            .map_err(|e| CoreError::fatal(format!("serialize work item: {e}")))?;
        redis::cmd("HSET")
            .arg(Self::key(&item.job_id, "items"))
            .arg(&item.id)
            .arg(raw)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;
        Ok(())
    }

    /// Remove the item from the processing list; returns false when some
    /// other actor (a racing sweep) already moved it.
    async fn leave_processing(&self, job_id: &str, item_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(Self::key(job_id, "processing"))
            .arg(1)
            .arg(item_id)
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        redis::cmd("ZREM")
            .arg(Self::key(job_id, "deadlines"))
            .arg(item_id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;
        Ok(removed > 0)
    }

    async fn stamp_completion(&self, job_id: &str) -> Result<()> {
        let progress = self.progress(job_id).await?;
        if progress.is_complete() {
            let mut conn = self.conn.clone();
            redis::cmd("HSETNX")
                .arg(Self::key(job_id, "meta"))
                .arg("completedAt")
                .arg(Utc::now().to_rfc3339())
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(transient)?;
        }
        Ok(())
    }
}

fn transient(e: redis::RedisError) -> CoreError {
    CoreError::transient(format!("redis: {e}"))
}

fn parse_meta_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> Result<()> {
        let mut conn = self.conn.clone();
        for mut item in items {
            item.job_id = job_id.to_string();
            item.status = WorkItemStatus::Pending;
            item.attempt = 0;
            item.max_attempts = self.policy.max_attempts;
            item.started_at = None;
            item.completed_at = None;
            self.store_item(&item).await?;
            redis::cmd("RPUSH")
                .arg(Self::key(job_id, "pending"))
                .arg(&item.id)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(transient)?;
        }
        Ok(())
    }

    async fn pop(&self, job_id: &str) -> Result<WorkItem> {
        let mut conn = self.conn.clone();
        let item_id: Option<String> = redis::cmd("LMOVE")
            .arg(Self::key(job_id, "pending"))
            .arg(Self::key(job_id, "processing"))
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        let item_id = item_id.ok_or(CoreError::QueueEmpty)?;

        let now = Utc::now();
        let mut item = self.load_item(job_id, &item_id).await?;
        item.status = WorkItemStatus::Processing;
        item.started_at = Some(now);
        self.store_item(&item).await?;

        let deadline = now + chrono::Duration::from_std(self.policy.visibility_timeout)
            .map_err(|e| CoreError::fatal(format!("visibility timeout out of range: {e}")))?;
        redis::cmd("ZADD")
            .arg(Self::key(job_id, "deadlines"))
            .arg(deadline.timestamp_millis())
            .arg(&item_id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;
        redis::cmd("HSETNX")
            .arg(Self::key(job_id, "meta"))
            .arg("startedAt")
            .arg(now.to_rfc3339())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(transient)?;

        Ok(item)
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: ExecutionResult) -> Result<()> {
        self.leave_processing(job_id, item_id).await?;
        let mut item = self.load_item(job_id, item_id).await?;
        item.status = WorkItemStatus::Completed;
        item.completed_at = Some(Utc::now());
        item.result = Some(result);
        self.store_item(&item).await?;
        self.stamp_completion(job_id).await
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: &str) -> Result<()> {
        self.leave_processing(job_id, item_id).await?;
        let mut item = self.load_item(job_id, item_id).await?;
        item.attempt += 1;
        item.error = Some(error.to_string());
        if item.attempt < item.max_attempts {
            item.status = WorkItemStatus::Pending;
            item.started_at = None;
            self.store_item(&item).await?;
            let mut conn = self.conn.clone();
            redis::cmd("RPUSH")
                .arg(Self::key(job_id, "pending"))
                .arg(item_id)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(transient)?;
        } else {
            item.status = WorkItemStatus::Failed;
            item.completed_at = Some(Utc::now());
            self.store_item(&item).await?;
        }
        self.stamp_completion(job_id).await
    }

    async fn progress(&self, job_id: &str) -> Result<JobProgress> {
        let mut conn = self.conn.clone();
        let raw_items: Vec<String> = redis::cmd("HVALS")
            .arg(Self::key(job_id, "items"))
            .query_async(&mut conn)
            .await
            .map_err(transient)?;

        let mut progress = JobProgress::default();
        progress.total = raw_items.len() as u64;
        for raw in raw_items {
            let item: WorkItem = serde_json::from_str(&raw)
                .map_err(|e| CoreError::fatal(format!("corrupt work item: {e}")))?;
            match item.status {
                WorkItemStatus::Pending => progress.pending += 1,
                WorkItemStatus::Processing => progress.processing += 1,
                WorkItemStatus::Completed => progress.completed += 1,
                WorkItemStatus::Failed => progress.failed += 1,
            }
        }

        let (started_at, completed_at): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(Self::key(job_id, "meta"))
            .arg("startedAt")
            .arg("completedAt")
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        progress.started_at = parse_meta_time(started_at);
        progress.completed_at = parse_meta_time(completed_at);
        Ok(progress)
    }

    async fn reclaim_expired(&self, job_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(Self::key(job_id, "deadlines"))
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(transient)?;

        let mut reclaimed = vec![];
        for item_id in expired {
            // Only requeue ids we actually removed from processing; a racing
            // Ack may have beaten us here.
            if !self.leave_processing(job_id, &item_id).await? {
                continue;
            }
            let mut item = self.load_item(job_id, &item_id).await?;
            if item.status != WorkItemStatus::Processing {
                continue;
            }
            item.status = WorkItemStatus::Pending;
            item.started_at = None;
            self.store_item(&item).await?;
            redis::cmd("LPUSH")
                .arg(Self::key(job_id, "pending"))
                .arg(&item_id)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(transient)?;
            reclaimed.push(item_id);
        }
        Ok(reclaimed)
    }

    async fn get_item(&self, job_id: &str, item_id: &str) -> Result<WorkItem> {
        self.load_item(job_id, item_id).await
    }

    async fn list_items(
        &self,
        job_id: &str,
        status: Option<WorkItemStatus>,
    ) -> Result<Vec<WorkItem>> {
        let mut conn = self.conn.clone();
        let raw_items: Vec<String> = redis::cmd("HVALS")
            .arg(Self::key(job_id, "items"))
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        let mut items = vec![];
        for raw in raw_items {
            let item: WorkItem = serde_json::from_str(&raw)
                .map_err(|e| CoreError::fatal(format!("corrupt work item: {e}")))?;
            if status.map_or(true, |s| item.status == s) {
                items.push(item);
            }
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}
