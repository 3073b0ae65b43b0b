//! HTTP API (C7): thin adapters mapping requests into the scheduler, the
//! resource manager, and the store. Every handler validates its own input,
//! calls exactly one component operation, and maps the result or error to
//! the wire shape; no orchestration logic lives here.

pub mod health;
pub mod hierarchy;
pub mod jobs;
pub mod resources;

use crate::bootstrap::Services;
use crate::model::ErrorBody;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;
use job_common::tracing_config::TraceErrorKind;
use poem::endpoint::PrometheusExporter;
use poem::middleware::{CookieJarManager, Cors};
use poem::{EndpointExt, Route};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApiService, Tags};

#[derive(Tags)]
enum ApiTags {
    Jobs,
    Resources,
    Hierarchy,
    Health,
}

#[derive(ApiResponse, Debug, Clone)]
pub enum ApiError {
    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    #[oai(status = 409)]
    Conflict(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(Json(ErrorBody::new(message)))
    }

    fn missing_scope(scope: &str) -> Self {
        ApiError::Forbidden(Json(ErrorBody::new(format!("missing scope: {scope}"))))
    }

    fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(Json(ErrorBody::new(message)))
    }

    fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(Json(ErrorBody::new(message)))
    }

    fn internal(message: impl Into<String>) -> Self {
        ApiError::InternalError(Json(ErrorBody::new(message)))
    }
}

impl TraceErrorKind for ApiError {
    fn trace_error_kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    fn is_expected(&self) -> bool {
        !matches!(self, ApiError::InternalError(_))
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match &value {
            StoreError::JobNotFound(_) => ApiError::not_found(value.to_safe_string()),
            StoreError::Transition(_) => ApiError::bad_request(value.to_safe_string()),
            StoreError::IdempotencyConflict => ApiError::conflict(value.to_safe_string()),
            StoreError::Storage(_) => ApiError::internal(value.to_safe_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(value: SchedulerError) -> Self {
        use job_common::SafeDisplay;
        match &value {
            SchedulerError::InvalidTaskDescription
            | SchedulerError::DepthExceeded(..)
            | SchedulerError::DepthMismatch(..) => ApiError::bad_request(value.to_safe_string()),
            SchedulerError::ParentNotFound(_) | SchedulerError::JobNotFound(_) => {
                ApiError::not_found(value.to_safe_string())
            }
            SchedulerError::Store(StoreError::JobNotFound(_)) => {
                ApiError::not_found(value.to_safe_string())
            }
            SchedulerError::Store(StoreError::Transition(_)) => {
                ApiError::bad_request(value.to_safe_string())
            }
            SchedulerError::Store(StoreError::IdempotencyConflict) => {
                ApiError::conflict(value.to_safe_string())
            }
            SchedulerError::Store(StoreError::Storage(_)) => {
                ApiError::internal(value.to_safe_string())
            }
        }
    }
}

impl From<crate::resource_manager::AllocationError> for ApiError {
    fn from(value: crate::resource_manager::AllocationError) -> Self {
        use crate::resource_manager::AllocationError;
        use job_common::SafeDisplay;
        match value {
            AllocationError::InvalidRequest => ApiError::bad_request(value.to_safe_string()),
            AllocationError::NoCapacity(_) => ApiError::conflict(value.to_safe_string()),
        }
    }
}

type Apis = (
    jobs::JobsApi,
    resources::ResourcesApi,
    hierarchy::HierarchyApi,
    health::HealthApi,
);

pub fn make_open_api_service(services: &Services) -> OpenApiService<Apis, ()> {
    OpenApiService::new(
        (
            jobs::JobsApi {
                services: services.clone(),
            },
            resources::ResourcesApi {
                services: services.clone(),
            },
            hierarchy::HierarchyApi {
                services: services.clone(),
            },
            health::HealthApi {
                services: services.clone(),
            },
        ),
        "Job Orchestrator API",
        env!("CARGO_PKG_VERSION"),
    )
}

pub fn combined_routes(services: &Services) -> Route {
    let api_service = make_open_api_service(services);
    let ui = api_service.swagger_ui();
    let spec = api_service.spec_endpoint_yaml();
    let metrics = PrometheusExporter::new(services.metrics.registry());

    Route::new()
        .nest("/", api_service)
        .nest("/docs", ui)
        .nest("/specs", spec)
        .nest("/metrics", metrics)
        .with(CookieJarManager::new())
        .with(
            Cors::new()
                .allow_origin_regex(&services.config.cors_origin_regex)
                .allow_credentials(true),
        )
        .data(services.token_verifier())
}
