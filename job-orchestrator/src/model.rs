//! Domain entities (§3 Data Model) and the wire DTOs the HTTP layer exchanges.

use crate::state_machine::JobStatus;
use chrono::{DateTime, Utc};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub parent_job_id: Option<Uuid>,
    pub depth: i32,
    pub task_description: String,
    pub worker_count: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Worker {
    pub id: Uuid,
    pub workspace_id: String,
    pub status: crate::state_machine::WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct ResourceAllocationRow {
    pub job_id: Uuid,
    pub depth: i32,
    pub granted_workers: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StateTransitionRow {
    pub entity_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Wire representation of a Job, returned from every jobs endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: Uuid,
    pub depth: i32,
    pub worker_count: i32,
    pub task_description: String,
    pub parent_job_id: Option<Uuid>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            depth: job.depth,
            worker_count: job.worker_count,
            task_description: job.task_description,
            parent_job_id: job.parent_job_id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub task_description: String,
    #[oai(default = "default_worker_count")]
    pub worker_count: i32,
    #[oai(default)]
    pub depth: i32,
    pub parent_job_id: Option<Uuid>,
}

fn default_worker_count() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct QuotaItem {
    pub depth: i32,
    pub max_workers: i32,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct UsageItem {
    pub depth: i32,
    pub allocated: i32,
    pub available: i32,
}

/// Per-depth usage snapshot (§3 HierarchyUsage), keyed by depth in the
/// response map so a client can look up a single depth without scanning.
#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct UsageObject {
    pub used: i32,
    pub quota: i32,
    pub warn_80: bool,
    pub warn_90: bool,
}

impl From<crate::resource_manager::DepthUsage> for UsageObject {
    fn from(usage: crate::resource_manager::DepthUsage) -> Self {
        Self {
            used: usage.used as i32,
            quota: usage.quota as i32,
            warn_80: usage.warn_80,
            warn_90: usage.warn_90,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub job_id: String,
    pub depth: i32,
    pub worker_count: i32,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct AllocateResponse {
    pub job_id: String,
    pub depth: i32,
    pub requested: i32,
    pub granted: i32,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub job_id: String,
    pub depth: i32,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub job_id: String,
    pub depth: i32,
    pub released: bool,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct HierarchyUsageResponse {
    pub usage: std::collections::HashMap<String, UsageObject>,
    pub active_jobs: i64,
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct ErrorBody {
    pub error: String,
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(error: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct HealthcheckResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ValidateRecursionRequest {
    pub current_depth: i64,
    pub max_depth: i64,
}

#[derive(Debug, Clone, Serialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ValidateRecursionResponse {
    pub valid: bool,
    pub reason: Option<String>,
}
