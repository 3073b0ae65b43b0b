use super::{ApiError, ApiTags};
use crate::bootstrap::Services;
use crate::model::{JobResponse, SubmitJobRequest};
use crate::repo::job::JobFilter;
use crate::scheduler::MAX_TASK_DESCRIPTION_LEN;
use crate::state_machine::JobStatus;
use job_common::auth::{require_scope, scopes, JobBearerAuth};
use poem_openapi::param::{Header, Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};
use uuid::Uuid;

pub struct JobsApi {
    pub services: Services,
}

#[derive(ApiResponse)]
enum SubmitJobResponse {
    #[oai(status = 201)]
    Created(Json<JobResponse>),
}

#[OpenApi(prefix_path = "/api/jobs", tag = "ApiTags::Jobs")]
impl JobsApi {
    #[oai(path = "/submit", method = "post", operation_id = "submit_job")]
    async fn submit(
        &self,
        auth: JobBearerAuth,
        body: Json<SubmitJobRequest>,
        #[oai(name = "Idempotency-Key")] idempotency_key: Header<Option<String>>,
    ) -> Result<SubmitJobResponse, ApiError> {
        require_scope(&auth.0, scopes::JOBS_WRITE).map_err(ApiError::missing_scope)?;

        let request = body.0;
        let len = request.task_description.chars().count();
        if len == 0 || len > MAX_TASK_DESCRIPTION_LEN {
            return Err(ApiError::bad_request(format!(
                "task_description must be between 1 and {MAX_TASK_DESCRIPTION_LEN} characters"
            )));
        }
        if !(1..=1000).contains(&request.worker_count) {
            return Err(ApiError::bad_request("worker_count must be between 1 and 1000"));
        }
        if !(0..=1000).contains(&request.depth) {
            return Err(ApiError::bad_request("depth must be between 0 and 1000"));
        }

        let fingerprint = serde_json::to_string(&request).unwrap_or_default();

        if let Some(key) = idempotency_key.0.as_deref() {
            let (fresh, snapshot) = self
                .services
                .store
                .claim_idempotency_key(key, &fingerprint)
                .await?;
            if !fresh {
                let snapshot = snapshot.ok_or_else(|| ApiError::internal("missing idempotency snapshot"))?;
                let response: JobResponse = serde_json::from_value(snapshot)
                    .map_err(|_| ApiError::internal("corrupt idempotency snapshot"))?;
                return Ok(SubmitJobResponse::Created(Json(response)));
            }
        }

        let job = self
            .services
            .scheduler
            .submit(
                request.task_description.clone(),
                request.depth as u32,
                request.parent_job_id,
                request.worker_count as u32,
            )
            .await?;
        let response = JobResponse::from(job);

        if let Some(key) = idempotency_key.0.as_deref() {
            let snapshot = serde_json::to_value(&response).unwrap_or_default();
            self.services
                .store
                .store_idempotent_response(key, &fingerprint, &snapshot)
                .await?;
        }

        Ok(SubmitJobResponse::Created(Json(response)))
    }

    #[oai(path = "/:id", method = "get", operation_id = "get_job")]
    async fn get(&self, auth: JobBearerAuth, id: Path<Uuid>) -> Result<Json<JobResponse>, ApiError> {
        require_scope(&auth.0, scopes::JOBS_READ).map_err(ApiError::missing_scope)?;
        let job = self.services.scheduler.status(id.0).await?;
        Ok(Json(JobResponse::from(job)))
    }

    #[oai(path = "/:id/cancel", method = "post", operation_id = "cancel_job")]
    async fn cancel(&self, auth: JobBearerAuth, id: Path<Uuid>) -> Result<Json<JobResponse>, ApiError> {
        require_scope(&auth.0, scopes::JOBS_WRITE).map_err(ApiError::missing_scope)?;

        let interrupted = self.services.scheduler.cancel(id.0).await?;
        let job = self.services.scheduler.status(id.0).await?;
        if !interrupted && job.status.is_terminal() {
            return Err(ApiError::bad_request(format!(
                "job is already {}",
                job.status
            )));
        }
        Ok(Json(JobResponse::from(job)))
    }

    #[oai(path = "/", method = "get", operation_id = "list_jobs")]
    async fn list(
        &self,
        auth: JobBearerAuth,
        depth: Query<Option<i32>>,
        status: Query<Option<JobStatus>>,
        parent_job_id: Query<Option<Uuid>>,
        limit: Query<Option<i64>>,
        offset: Query<Option<i64>>,
    ) -> Result<Json<Vec<JobResponse>>, ApiError> {
        require_scope(&auth.0, scopes::JOBS_READ).map_err(ApiError::missing_scope)?;

        let limit = limit.0.unwrap_or(50);
        let offset = offset.0.unwrap_or(0);
        if !(1..=500).contains(&limit) {
            return Err(ApiError::bad_request("limit must be between 1 and 500"));
        }
        if offset < 0 {
            return Err(ApiError::bad_request("offset must be non-negative"));
        }

        let jobs = self
            .services
            .scheduler
            .list(JobFilter {
                depth: depth.0,
                status: status.0,
                parent_job_id: parent_job_id.0,
                limit,
                offset,
            })
            .await?;

        Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
    }
}
