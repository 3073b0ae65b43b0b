use super::{ApiError, ApiTags};
use crate::bootstrap::Services;
use crate::model::{AllocateRequest, AllocateResponse, QuotaItem, ReleaseRequest, ReleaseResponse, UsageItem};
use job_common::auth::{require_scope, scopes, JobBearerAuth};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};

pub struct ResourcesApi {
    pub services: Services,
}

#[derive(ApiResponse)]
enum AllocateApiResponse {
    #[oai(status = 201)]
    Created(Json<AllocateResponse>),
}

#[OpenApi(prefix_path = "/api/resources", tag = "ApiTags::Resources")]
impl ResourcesApi {
    #[oai(path = "/quotas", method = "get", operation_id = "resource_quotas")]
    async fn quotas(&self, auth: JobBearerAuth) -> Result<Json<Vec<QuotaItem>>, ApiError> {
        require_scope(&auth.0, scopes::RESOURCES_READ).map_err(ApiError::missing_scope)?;

        let mut items: Vec<QuotaItem> = self
            .services
            .scheduler
            .workers_by_depth()
            .iter()
            .map(|(&depth, &max_workers)| QuotaItem {
                depth: depth as i32,
                max_workers: max_workers as i32,
            })
            .collect();
        items.sort_by_key(|item| item.depth);
        Ok(Json(items))
    }

    #[oai(path = "/allocate", method = "post", operation_id = "allocate_resources")]
    async fn allocate(
        &self,
        auth: JobBearerAuth,
        body: Json<AllocateRequest>,
    ) -> Result<AllocateApiResponse, ApiError> {
        require_scope(&auth.0, scopes::RESOURCES_WRITE).map_err(ApiError::missing_scope)?;

        let request = body.0;
        if request.depth < 0 || request.worker_count <= 0 {
            return Err(ApiError::bad_request(
                "depth must be non-negative and worker_count must be positive",
            ));
        }

        let allocation = self.services.resources.allocate(
            &request.job_id,
            request.depth as u32,
            request.worker_count as u32,
        )?;
        self.services
            .store
            .record_allocation(
                request.job_id.parse().map_err(|_| ApiError::bad_request("job_id must be a uuid"))?,
                request.depth,
                allocation.granted as i32,
            )
            .await?;
        self.services
            .metrics
            .refresh_gauges(self.services.scheduler.active_jobs(), &self.services.resources.usage());

        Ok(AllocateApiResponse::Created(Json(AllocateResponse {
            job_id: request.job_id,
            depth: request.depth,
            requested: allocation.requested as i32,
            granted: allocation.granted as i32,
        })))
    }

    #[oai(path = "/release", method = "post", operation_id = "release_resources")]
    async fn release(
        &self,
        auth: JobBearerAuth,
        body: Json<ReleaseRequest>,
    ) -> Result<Json<ReleaseResponse>, ApiError> {
        require_scope(&auth.0, scopes::RESOURCES_WRITE).map_err(ApiError::missing_scope)?;

        let request = body.0;
        let released = self.services.resources.release(&request.job_id, request.depth as u32);
        if let Ok(job_id) = request.job_id.parse() {
            self.services.store.clear_allocation(job_id, request.depth).await?;
        }
        self.services
            .metrics
            .refresh_gauges(self.services.scheduler.active_jobs(), &self.services.resources.usage());

        Ok(Json(ReleaseResponse {
            job_id: request.job_id,
            depth: request.depth,
            released,
        }))
    }

    #[oai(path = "/usage", method = "get", operation_id = "resource_usage")]
    async fn usage(&self, auth: JobBearerAuth) -> Result<Json<Vec<UsageItem>>, ApiError> {
        require_scope(&auth.0, scopes::RESOURCES_READ).map_err(ApiError::missing_scope)?;

        let items = self
            .services
            .resources
            .usage()
            .into_iter()
            .map(|usage| UsageItem {
                depth: usage.depth as i32,
                allocated: usage.used as i32,
                available: usage.quota.saturating_sub(usage.used) as i32,
            })
            .collect();
        Ok(Json(items))
    }
}
