//! History handlers: finished clips in the output area.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::warn;

use jclip_worker::{HistoryEntry, JobError};

use crate::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub files: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub file_path: PathBuf,
}

/// Outcome of a destructive history operation.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /history
pub async fn history(State(state): State<AppState>) -> ApiResult<Json<HistoryResponse>> {
    let files = state.orchestrator.history().await?;
    Ok(Json(HistoryResponse { files }))
}

/// Delete one finished clip and the job directory that produced it.
///
/// POST /delete with `{"filePath": ...}`
pub async fn delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> Json<OperationResponse> {
    Json(delete_artifact(&state, request).await)
}

/// GET /delete?filePath=<path>
pub async fn delete_by_query(
    State(state): State<AppState>,
    Query(request): Query<DeleteRequest>,
) -> Json<OperationResponse> {
    Json(delete_artifact(&state, request).await)
}

async fn delete_artifact(state: &AppState, request: DeleteRequest) -> OperationResponse {
    match state.orchestrator.delete_artifact(&request.file_path).await {
        Ok(()) => OperationResponse::ok(),
        Err(JobError::OutsideOutputDir(_)) => OperationResponse::failed("Invalid file path"),
        Err(e) => {
            warn!(path = %request.file_path.display(), error = %e, "Delete failed");
            OperationResponse::failed("Deletion failed")
        }
    }
}

/// Stop every job and wipe the output area and scratch root.
///
/// POST /clear_all
pub async fn clear_all(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<OperationResponse>) {
    let session = state.sessions.load(&jar, state.orchestrator.epoch()).await;
    let report = state.orchestrator.clear_all().await;
    state.sessions.clear_job(&session.id).await;

    let response = if report.success {
        OperationResponse::ok()
    } else {
        OperationResponse::failed("Some files could not be removed")
    };
    (jar.add(session.cookie()), Json(response))
}
