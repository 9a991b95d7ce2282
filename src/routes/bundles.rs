//! Bundle listing, inspection, export and import.

use crate::bundle::{BundleInfo, BundleService, ExportRequest, ExportSummary, ImportSummary, Selection};
use crate::error::ApiError;
use crate::models::ApiResponse;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Request body for creating a bundle from the live project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateBundleRequest {
    /// Letters, digits and hyphens; at most 64 characters.
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Any of `wiki`, `ticket`, `archive`, `group`, `list`, `milestone`.
    /// An empty list creates a metadata-only bundle.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// List bundle names in the store
#[openapi(tag = "Bundles")]
#[get("/bundles")]
pub fn list_bundles(
    service: &State<BundleService>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    let names = service.list()?;
    Ok(Json(ApiResponse { data: names }))
}

/// Get a bundle's metadata and component manifest
#[openapi(tag = "Bundles")]
#[get("/bundles/<name>")]
pub fn get_bundle(
    name: &str,
    service: &State<BundleService>,
) -> Result<Json<ApiResponse<BundleInfo>>, ApiError> {
    let info = service.info(name)?;
    Ok(Json(ApiResponse { data: info }))
}

/// Export the live project into a new bundle
#[openapi(tag = "Bundles")]
#[post("/bundles", data = "<request>")]
pub async fn create_bundle(
    request: Json<CreateBundleRequest>,
    service: &State<BundleService>,
) -> Result<Json<ApiResponse<ExportSummary>>, ApiError> {
    let request = request.into_inner();
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("bundle name is required".to_string()));
    }
    let selection = Selection::from_flags(&request.domains).map_err(ApiError::BadRequest)?;

    let report = service
        .export(&ExportRequest {
            name: request.name,
            author: request.author,
            description: request.description,
            selection,
        })
        .await?;

    Ok(Json(ApiResponse {
        data: report.summary(),
    }))
}

/// Import a bundle into the live project, replacing the domains it contains
#[openapi(tag = "Bundles")]
#[post("/bundles/<name>/import")]
pub async fn import_bundle(
    name: &str,
    service: &State<BundleService>,
) -> Result<Json<ApiResponse<ImportSummary>>, ApiError> {
    let report = service.import(name).await?;
    Ok(Json(ApiResponse {
        data: report.summary(),
    }))
}
