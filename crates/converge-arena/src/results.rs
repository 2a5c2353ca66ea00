// Result aggregation and output publication.
//
// When a job completes, the controller folds its items into JobResults and
// writes them to the configured backend (S3 bucket + prefix, or a PVC
// path + subPath) under `arena/results/<jobId>.json`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use converge_core::{CoreError, ExecutionStatus, Result, WorkItemStatus};
use converge_queue::WorkQueue;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};

/// One failed item carried into the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub item_id: String,
    pub scenario_id: String,
    pub provider_id: String,
    pub error: String,
}

/// Aggregated outcome of one Arena job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: String,
    pub total: u64,
    pub pass: u64,
    pub fail: u64,
    pub pass_rate: f64,
    pub errors: Vec<ItemError>,
    pub completed_at: DateTime<Utc>,
}

/// Fold a completed job's items into JobResults.
pub async fn aggregate(queue: &Arc<dyn WorkQueue>, job_id: &str) -> Result<JobResults> {
    let items = queue.list_items(job_id, None).await?;
    let mut pass = 0u64;
    let mut fail = 0u64;
    let mut errors = vec![];
    for item in &items {
        match item.status {
            WorkItemStatus::Completed => {
                match item.result.as_ref().map(|r| r.status) {
                    Some(ExecutionStatus::Pass) => pass += 1,
                    _ => {
                        fail += 1;
                        if let Some(error) =
                            item.result.as_ref().and_then(|r| r.error.clone())
                        {
                            errors.push(ItemError {
                                item_id: item.id.clone(),
                                scenario_id: item.scenario_id.clone(),
                                provider_id: item.provider_id.clone(),
                                error,
                            });
                        }
                    }
                }
            }
            WorkItemStatus::Failed => {
                fail += 1;
                errors.push(ItemError {
                    item_id: item.id.clone(),
                    scenario_id: item.scenario_id.clone(),
                    provider_id: item.provider_id.clone(),
                    error: item.error.clone().unwrap_or_else(|| "unknown".into()),
                });
            }
            WorkItemStatus::Pending | WorkItemStatus::Processing => {
                return Err(CoreError::conflict(format!(
                    "job {job_id} still has in-flight items"
                )));
            }
        }
    }
    let total = items.len() as u64;
    Ok(JobResults {
        job_id: job_id.to_string(),
        total,
        pass,
        fail,
        pass_rate: if total == 0 {
            1.0
        } else {
            pass as f64 / total as f64
        },
        errors,
        completed_at: Utc::now(),
    })
}

/// Where JobResults are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputBackend {
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    Pvc {
        path: String,
        #[serde(default)]
        sub_path: Option<String>,
    },
}

impl OutputBackend {
    fn store(&self) -> Result<(Arc<dyn ObjectStore>, Option<String>, String)> {
        match self {
            OutputBackend::S3 { bucket, prefix } => {
                let store = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| CoreError::fatal(format!("s3 output config: {e}")))?;
                Ok((
                    Arc::new(store),
                    prefix.clone(),
                    format!("s3://{bucket}"),
                ))
            }
            OutputBackend::Pvc { path, sub_path } => {
                let store = LocalFileSystem::new_with_prefix(path)
                    .map_err(|e| CoreError::fatal(format!("pvc output path: {e}")))?;
                Ok((
                    Arc::new(store),
                    sub_path.clone(),
                    format!("file://{path}"),
                ))
            }
        }
    }

    /// Write the report; returns the result URL recorded on the job status.
    pub async fn write(&self, results: &JobResults) -> Result<String> {
        let (store, prefix, base) = self.store()?;
        let key = match &prefix {
            Some(prefix) => format!("{prefix}/arena/results/{}.json", results.job_id),
            None => format!("arena/results/{}.json", results.job_id),
        };
        let payload = serde_json::to_vec_pretty(results)
            .map_err(|e| CoreError::fatal(format!("serialize job results: {e}")))?;
        store
            .put(&ObjectPath::from(key.clone()), PutPayload::from(payload))
            .await
            .map_err(|e| CoreError::transient(format!("write job results: {e}")))?;
        Ok(format!("{base}/{key}"))
    }
}
