//! HTTP routes exercised in-process
//!
//! Requests go straight into the router via `tower::ServiceExt::oneshot`;
//! no socket is bound.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use invoice_vault::config::AppConfig;
use invoice_vault::http_server::HttpServer;
use invoice_vault::service::VaultService;
use invoice_vault::store::SQLITE_HEADER;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "vault-test-boundary";

struct App {
    temp: TempDir,
    service: Arc<VaultService>,
    router: Router,
}

fn app_with(configure: impl FnOnce(AppConfig) -> AppConfig) -> App {
    let temp = TempDir::new().unwrap();
    let config = configure(AppConfig::new(temp.path()).with_admin_token(TOKEN));
    let service = Arc::new(VaultService::open(&config).unwrap());
    let router = HttpServer::new(&config, Arc::clone(&service)).router();
    App {
        temp,
        service,
        router,
    }
}

fn app() -> App {
    app_with(|c| c)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn upload(uri: &str, field: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            f = field,
            n = filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &App, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &App, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn temp_count(app: &App) -> usize {
    std::fs::read_dir(app.temp.path().join("temp")).unwrap().count()
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_health_is_open() {
    let app = app();
    let (status, body) = send_json(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_maintenance_routes_require_token() {
    let app = app();

    let (status, body) = send_json(&app, get("/backup/download/database", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VAULT_UNAUTHORIZED");

    let (status, _) = send_json(&app, get("/backup/download/database", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_routes_closed_without_configured_token() {
    let temp = TempDir::new().unwrap();
    let config = AppConfig::new(temp.path());
    let service = Arc::new(VaultService::open(&config).unwrap());
    let router = HttpServer::new(&config, service).router();

    let response = router
        .oneshot(get("/backup/download/database", Some("")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Downloads
// =============================================================================

#[tokio::test]
async fn test_database_download_headers() {
    let app = app();
    add_company(app.service.store(), "Acme");

    let (status, headers, body) =
        send(&app, get("/backup/download/database", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);

    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"invoice-backup-"));
    assert!(disposition.ends_with(".db\""));
    assert_eq!(
        headers[header::CONTENT_LENGTH].to_str().unwrap(),
        body.len().to_string()
    );
    assert_eq!(&body[..16], SQLITE_HEADER);
}

#[tokio::test]
async fn test_full_download_is_zip() {
    let app = app();
    let (status, headers, body) = send(&app, get("/backup/download/full", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    let names = zip_names(&body);
    assert!(names.contains(&"invoice.db".to_string()));
    assert!(names.contains(&"uploads/".to_string()));
}

// =============================================================================
// Restores
// =============================================================================

#[tokio::test]
async fn test_database_restore_over_http() {
    let app = app();
    add_company(app.service.store(), "Backed Up");
    let (_, _, db) = send(&app, get("/backup/download/database", Some(TOKEN))).await;
    add_company(app.service.store(), "Later");

    let (status, body) = send_json(
        &app,
        upload("/backup/restore/database", "backup", "invoice-backup.db", &db),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(company_names(app.service.store()), vec!["Backed Up".to_string()]);
    assert_eq!(temp_count(&app), 0);
}

#[tokio::test]
async fn test_wrong_extension_never_reaches_disk() {
    let app = app();
    let (status, body) = send_json(
        &app,
        upload("/backup/restore/uploads", "backup", "uploads.txt", b"hello"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VAULT_INVALID_ARTIFACT");
    assert_eq!(temp_count(&app), 0);
}

#[tokio::test]
async fn test_missing_field_is_rejected() {
    let app = app();
    let (status, body) = send_json(
        &app,
        upload("/backup/restore/full", "file", "full.zip", b"PK"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VAULT_INVALID_ARTIFACT");
}

#[tokio::test]
async fn test_oversized_upload_is_413() {
    let app = app_with(|mut c| {
        c.max_upload_bytes = 1024;
        c
    });
    let big = vec![0u8; 8 * 1024];
    let (status, body) = send_json(
        &app,
        upload("/backup/restore/database", "backup", "big.db", &big),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "VAULT_ARTIFACT_TOO_LARGE");
    assert_eq!(temp_count(&app), 0);
}

#[tokio::test]
async fn test_non_multipart_restore_is_400() {
    let app = app();
    let (status, body) = send_json(&app, post("/backup/restore/database")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

// =============================================================================
// Reset
// =============================================================================

#[tokio::test]
async fn test_reset_over_http() {
    let app = app();
    seed_invoice(app.service.store());

    let (status, body) = send_json(&app, post("/backup/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["rows_deleted"], 5);
    assert_eq!(count(app.service.store(), "invoices"), 0);
}
