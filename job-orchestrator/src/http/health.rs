use super::ApiTags;
use crate::bootstrap::Services;
use crate::model::HealthcheckResponse;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApi};

pub struct HealthApi {
    pub services: Services,
}

#[derive(ApiResponse)]
enum HealthResponse {
    #[oai(status = 200)]
    Ok(Json<HealthcheckResponse>),
    #[oai(status = 503)]
    Unavailable(Json<HealthcheckResponse>),
}

#[OpenApi(tag = "ApiTags::Health")]
impl HealthApi {
    #[oai(path = "/health", method = "get", operation_id = "healthcheck")]
    async fn healthcheck(&self) -> HealthResponse {
        match sqlx::query("SELECT 1").execute(&self.services.pool).await {
            Ok(_) => HealthResponse::Ok(Json(HealthcheckResponse {
                status: "ok".to_string(),
            })),
            Err(err) => {
                tracing::error!(error = %err, "healthcheck database probe failed");
                HealthResponse::Unavailable(Json(HealthcheckResponse {
                    status: "unavailable".to_string(),
                }))
            }
        }
    }
}
