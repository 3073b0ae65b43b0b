use super::{ApiError, ApiTags};
use crate::bootstrap::Services;
use crate::model::{HierarchyUsageResponse, SchedulerStats, UsageObject, ValidateRecursionRequest, ValidateRecursionResponse};
use job_common::auth::{require_scope, scopes, JobBearerAuth};
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct HierarchyApi {
    pub services: Services,
}

#[OpenApi(prefix_path = "/api/v1/recursion", tag = "ApiTags::Hierarchy")]
impl HierarchyApi {
    #[oai(path = "/hierarchy", method = "get", operation_id = "recursion_hierarchy")]
    async fn hierarchy(&self, auth: JobBearerAuth) -> Result<Json<HierarchyUsageResponse>, ApiError> {
        require_scope(&auth.0, scopes::SUPERVISOR_READ).map_err(ApiError::missing_scope)?;
        let usage = self
            .services
            .resources
            .usage()
            .into_iter()
            .map(|depth_usage| (depth_usage.depth.to_string(), UsageObject::from(depth_usage)))
            .collect();
        let active_jobs = self.services.scheduler.active_jobs();
        Ok(Json(HierarchyUsageResponse { usage, active_jobs }))
    }

    #[oai(path = "/stats", method = "get", operation_id = "recursion_stats")]
    async fn stats(&self, auth: JobBearerAuth) -> Result<Json<SchedulerStats>, ApiError> {
        require_scope(&auth.0, scopes::SUPERVISOR_READ).map_err(ApiError::missing_scope)?;
        let stats = self.services.scheduler.stats();
        Ok(Json(SchedulerStats {
            submitted: stats.submitted,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
        }))
    }

    #[oai(path = "/validate", method = "post", operation_id = "validate_recursion")]
    async fn validate(
        &self,
        auth: JobBearerAuth,
        body: Json<ValidateRecursionRequest>,
    ) -> Result<Json<ValidateRecursionResponse>, ApiError> {
        require_scope(&auth.0, scopes::SUPERVISOR_WRITE).map_err(ApiError::missing_scope)?;
        let request = body.0;
        let result = self.services.scheduler.validator().validate_depth(
            request.current_depth,
            request.max_depth,
            self.services.scheduler.workers_by_depth(),
        );
        Ok(Json(ValidateRecursionResponse {
            valid: result.is_valid,
            reason: result.error_message,
        }))
    }
}
