//! Clip job handlers.
//!
//! Provides REST API endpoints for:
//! - Starting an encode for the caller's session
//! - Polling the state of the session's current job
//! - Looking up its preview
//! - Cancelling it

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use jclip_models::{ClipRequest, OutputFormat};
use jclip_worker::{PreviewInfo, StatusReport};

use crate::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Acknowledgement of an accepted clip request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Always `encoding`
    pub status: &'static str,
    pub job_id: String,
    /// Where the clip will be written
    pub output_file: String,
    pub format: OutputFormat,
    pub audio_index: u32,
}

/// Job status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `encoding`, `success`, `failure`, or `error` when there is no job
    pub status: String,
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    /// `ready`, or `error` when the job has no usable preview
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    /// Page the client should return to
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub status: &'static str,
    pub next: String,
    pub process_found: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start encoding a clip for the caller's session.
///
/// POST /generate
///
/// Returns 202 once the job exists and is observable as `encoding`.
/// Replaces the session's previous job binding without touching that job.
pub async fn generate(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<ClipRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<GenerateResponse>)> {
    request.validate()?;

    let session = state.sessions.load(&jar, state.orchestrator.epoch()).await;
    let handle = state.orchestrator.launch(&request).await?;

    info!(
        session = %session.id,
        job_id = %handle.job_id,
        source = %request.source_path,
        "Clip requested"
    );

    let response = GenerateResponse {
        status: "encoding",
        job_id: handle.job_id.to_string(),
        output_file: handle.artifact_path.display().to_string(),
        format: handle.format,
        audio_index: handle.audio_index,
    };
    state.sessions.bind_job(&session.id, handle).await;

    Ok((StatusCode::ACCEPTED, jar.add(session.cookie()), Json(response)))
}

/// Report the state of the session's current job.
///
/// GET /status
pub async fn status(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<StatusResponse>) {
    let session = state.sessions.load(&jar, state.orchestrator.epoch()).await;
    let job = state.orchestrator.reconcile(session.job.clone());

    let response = match state.orchestrator.status(job.as_ref()).await {
        StatusReport::Job { state, log } => StatusResponse {
            status: state.as_str().to_string(),
            log,
            message: None,
        },
        StatusReport::NoJob => StatusResponse {
            status: "error".to_string(),
            log: String::new(),
            message: Some("No job directory".to_string()),
        },
    };

    (jar.add(session.cookie()), Json(response))
}

/// Locate the low-resolution preview of the session's current job.
///
/// GET /preview
pub async fn preview(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<PreviewResponse>) {
    let session = state.sessions.load(&jar, state.orchestrator.epoch()).await;
    let job = state.orchestrator.reconcile(session.job.clone());

    let response = match state.orchestrator.preview(job.as_ref()).await {
        Some(preview) => PreviewResponse {
            status: "ready",
            preview: Some(preview),
            message: None,
        },
        None => PreviewResponse {
            status: "error",
            preview: None,
            message: Some("No preview".to_string()),
        },
    };

    (jar.add(session.cookie()), Json(response))
}

/// Cancel the session's current job and discard everything it produced.
///
/// GET /cancel?next=<page>
///
/// Idempotent: succeeds when there is no job or the job already finished.
pub async fn cancel(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CancelQuery>,
) -> (CookieJar, Json<CancelResponse>) {
    let session = state.sessions.load(&jar, state.orchestrator.epoch()).await;
    let job = state.orchestrator.reconcile(session.job.clone());

    let report = state.orchestrator.cancel(job.as_ref()).await;
    state.sessions.clear_job(&session.id).await;

    let response = CancelResponse {
        status: "cancelled",
        next: query.next.unwrap_or_else(|| "index".to_string()),
        process_found: report.process_found,
        errors: report.errors,
    };

    (jar.add(session.cookie()), Json(response))
}
