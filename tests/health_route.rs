mod common;

use std::sync::Arc;

use project_bundles::bundle::BundleService;
use project_bundles::models::ApiResponse;
use project_bundles::project::MemoryProject;
use project_bundles::routes::health::{HealthResponse, health_check, live_health};
use project_bundles::test_support::TestRocketBuilder;
use rocket::http::Status;
use rocket::routes;
use tempfile::TempDir;

#[test]
fn health_endpoint_returns_ok() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![live_health])
        .blocking_client();

    let response = client.get("/api/v1/health/live").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let payload: ApiResponse<HealthResponse> = response.into_json().expect("valid JSON payload");
    assert_eq!(payload.data.status, "ok");
}

#[test]
fn health_check_reports_project_and_store() {
    let dir = TempDir::new().unwrap();
    let config = common::bundle_config(dir.path(), "alpha", common::inert_archive());
    let service = BundleService::new(config, Arc::new(MemoryProject::new("alpha", "/nonexistent")));

    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![health_check])
        .manage_bundle_service(service)
        .blocking_client();

    let response = client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let payload: ApiResponse<HealthResponse> = response.into_json().expect("valid JSON payload");
    assert_eq!(payload.data.project.as_deref(), Some("alpha"));
    assert_eq!(payload.data.bundle_store.as_deref(), Some("ok"));
}
