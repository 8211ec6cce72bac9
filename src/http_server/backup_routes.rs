//! Backup HTTP Routes
//!
//! Downloads, restores from an uploaded file, and the destructive reset.
//! Restore uploads arrive as multipart field `backup` and are spooled to
//! `temp/` before the swap controller sees them.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::response::{error_reply, ApiError, MessageResponse};
use crate::backup::{Artifact, ArtifactScope, SpoolGuard};
use crate::restore::{validate_extension, RestoreReport};
use crate::service::{ErrorKind, ServiceError, ServiceResult, UploadedArtifact, VaultService};

/// Multipart field carrying the artifact.
pub const UPLOAD_FIELD: &str = "backup";

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

// ==================
// Shared State
// ==================

pub struct BackupState {
    service: Arc<VaultService>,
    max_upload_bytes: u64,
}

impl BackupState {
    pub fn new(service: Arc<VaultService>, max_upload_bytes: u64) -> Self {
        Self {
            service,
            max_upload_bytes,
        }
    }
}

// ==================
// Backup Routes
// ==================

pub fn backup_routes(state: Arc<BackupState>) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/download/database", get(download_database_handler))
        .route("/download/uploads", get(download_uploads_handler))
        .route("/download/full", get(download_full_handler))
        .route("/restore/database", post(restore_database_handler))
        .route("/restore/uploads", post(restore_uploads_handler))
        .route("/restore/full", post(restore_full_handler))
        .route("/reset", post(reset_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ==================
// Download Handlers
// ==================

async fn download_database_handler(
    State(state): State<Arc<BackupState>>,
) -> Result<Response, ApiError> {
    let artifact = state
        .service
        .download_database_backup()
        .await
        .map_err(error_reply)?;
    Ok(artifact_response(artifact))
}

async fn download_uploads_handler(
    State(state): State<Arc<BackupState>>,
) -> Result<Response, ApiError> {
    let artifact = state
        .service
        .download_uploads_backup()
        .await
        .map_err(error_reply)?;
    Ok(artifact_response(artifact))
}

async fn download_full_handler(
    State(state): State<Arc<BackupState>>,
) -> Result<Response, ApiError> {
    let artifact = state
        .service
        .download_full_backup()
        .await
        .map_err(error_reply)?;
    Ok(artifact_response(artifact))
}

/// Archives have no length up front and go out chunked.
fn artifact_response(artifact: Artifact) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type()),
    );
    if let Some(len) = artifact.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    tracing::info!(
        scope = %artifact.scope,
        filename = %artifact.filename,
        bytes = ?artifact.content_length,
        "streaming artifact"
    );

    // A failed chunk aborts the connection; the client sees a truncated body.
    let scope = artifact.scope;
    let body = artifact.body.inspect(move |chunk| {
        if let Err(e) = chunk {
            tracing::error!(scope = %scope, error = %e, "artifact stream failed");
        }
    });

    (StatusCode::OK, headers, Body::from_stream(body)).into_response()
}

// ==================
// Restore Handlers
// ==================

async fn restore_database_handler(
    State(state): State<Arc<BackupState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload = receive(&state, ArtifactScope::Database, multipart).await?;
    let report = state
        .service
        .restore_database(upload)
        .await
        .map_err(error_reply)?;
    Ok(Json(restored("Database restored successfully", &report)))
}

async fn restore_uploads_handler(
    State(state): State<Arc<BackupState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload = receive(&state, ArtifactScope::Uploads, multipart).await?;
    let report = state
        .service
        .restore_uploads(upload)
        .await
        .map_err(error_reply)?;
    Ok(Json(restored("Uploads restored successfully", &report)))
}

async fn restore_full_handler(
    State(state): State<Arc<BackupState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload = receive(&state, ArtifactScope::Full, multipart).await?;
    let report = state
        .service
        .restore_full(upload)
        .await
        .map_err(error_reply)?;
    Ok(Json(restored("Full backup restored successfully", &report)))
}

fn restored(message: &str, report: &RestoreReport) -> MessageResponse {
    MessageResponse {
        files_restored: report.upload_files,
        ..MessageResponse::ok(message)
    }
}

async fn receive(
    state: &BackupState,
    scope: ArtifactScope,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadedArtifact, ApiError> {
    let multipart = multipart.map_err(|e| {
        error_reply(ServiceError::invalid_artifact(format!(
            "Expected a multipart upload: {}",
            e.body_text()
        )))
    })?;
    spool_upload(state, scope, multipart)
        .await
        .map_err(error_reply)
}

/// Write the `backup` field to a fresh file under `temp/`.
///
/// The original filename is checked before a single byte is stored. The
/// partial file is removed on every failure path.
async fn spool_upload(
    state: &BackupState,
    scope: ArtifactScope,
    mut multipart: Multipart,
) -> ServiceResult<UploadedArtifact> {
    let limit = state.max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        validate_extension(scope, &original_name)?;

        let spool = SpoolGuard::new(state.service.layout().upload_spool_file(scope.extension()));
        let mut file = File::create(spool.path()).await.map_err(upload_failed)?;
        let mut received: u64 = 0;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            received += chunk.len() as u64;
            if received > limit {
                return Err(ServiceError::too_large(limit));
            }
            file.write_all(&chunk).await.map_err(upload_failed)?;
        }
        file.sync_all().await.map_err(upload_failed)?;
        drop(file);

        tracing::info!(
            scope = %scope,
            filename = %original_name,
            bytes = received,
            "restore upload received"
        );
        return Ok(UploadedArtifact {
            path: spool.disarm(),
            original_name,
        });
    }

    Err(ServiceError::invalid_artifact(format!(
        "No file in the '{}' field",
        UPLOAD_FIELD
    )))
}

fn multipart_error(err: MultipartError, limit: u64) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::too_large(limit)
    } else {
        tracing::warn!(error = %err.body_text(), "unreadable multipart body");
        ServiceError::invalid_artifact("The upload could not be read")
    }
}

fn upload_failed(err: std::io::Error) -> ServiceError {
    ServiceError::new(ErrorKind::RestoreFailed, "The upload could not be stored").with_source(err)
}

// ==================
// Reset Handler
// ==================

async fn reset_handler(
    State(state): State<Arc<BackupState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let report = state.service.reset_all_data().await.map_err(error_reply)?;
    Ok(Json(MessageResponse {
        rows_deleted: Some(report.total()),
        ..MessageResponse::ok("All data has been reset")
    }))
}
