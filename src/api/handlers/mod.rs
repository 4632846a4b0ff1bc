use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::error::SnapshotError;
use crate::models::*;
use crate::service::SnapshotService;

type ApiError = (StatusCode, Json<Value>);

// ============================================================
// Error Handling
// ============================================================

/// Map a core error to a response. Storage failures are logged in full
/// server-side; clients only see a generic message.
fn api_error(e: SnapshotError) -> ApiError {
    match e {
        SnapshotError::NotFound { .. } => error_body(StatusCode::NOT_FOUND, "No diagram available"),
        SnapshotError::InvalidDocument { .. } => {
            tracing::warn!("Validation error: {}", e);
            error_body(StatusCode::BAD_REQUEST, &e.to_string())
        }
        other => {
            tracing::error!("Internal error: {}", other);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================
// Documents & Snapshots
// ============================================================

pub async fn latest_document(
    State(service): State<SnapshotService>,
) -> Result<Json<LatestDocumentResponse>, ApiError> {
    service
        .fetch_active_document()
        .map(|doc| Json(doc.into()))
        .map_err(api_error)
}

pub async fn list_versions(
    State(service): State<SnapshotService>,
) -> Result<Json<Vec<SnapshotEntry>>, ApiError> {
    service.list_snapshots().map(Json).map_err(api_error)
}

/// Accepts `{xml, title?, note?}`. A body that is not JSON is treated as
/// missing `xml` rather than rejected by the extractor.
pub async fn save_document(
    State(service): State<SnapshotService>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitDocumentResponse>), ApiError> {
    let input: SubmitDocumentInput = serde_json::from_slice(&body).unwrap_or_default();
    if input.xml.as_deref().map_or(true, str::is_empty) {
        return Err(error_body(StatusCode::BAD_REQUEST, "Missing xml"));
    }

    let entry = service.submit_document(&input).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(SubmitDocumentResponse::from(&entry))))
}
