//! Lightweight service health endpoints used for readiness checks and tests.

use crate::bundle::BundleService;
use crate::models::ApiResponse;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// Static status string reporting application readiness.
    pub status: String,
    /// Project served by this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// `ok`, `missing` (root not created yet) or `unset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_store: Option<String>,
}

/// Liveness probe returning a trivial JSON payload.
#[openapi(tag = "Health")]
#[get("/health/live")]
pub fn live_health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse {
        data: HealthResponse {
            status: "ok".to_string(),
            project: None,
            bundle_store: None,
        },
    })
}

/// Readiness check reporting the project and the bundle store location.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(service: &State<BundleService>) -> Json<ApiResponse<HealthResponse>> {
    let bundle_store = match service.config().store_root.as_deref() {
        None => "unset",
        Some(root) if root.is_dir() => "ok",
        Some(_) => "missing",
    };

    Json(ApiResponse {
        data: HealthResponse {
            status: "ok".to_string(),
            project: Some(service.project().project_name().to_string()),
            bundle_store: Some(bundle_store.to_string()),
        },
    })
}
