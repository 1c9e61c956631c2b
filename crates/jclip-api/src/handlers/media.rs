//! Source media handlers.
//!
//! Both endpoints read through the orchestrator's probe cache, so they never
//! fail on an unreadable source; they answer with fallback metadata instead.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use jclip_models::{AudioTrack, OutputFormat};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolutionQuery {
    pub source: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Serialize)]
pub struct ResolutionResponse {
    /// `WxH`
    pub scaled: String,
}

#[derive(Debug, Deserialize)]
pub struct TracksQuery {
    pub source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksResponse {
    pub resolution: [u32; 2],
    pub audio_tracks: Vec<AudioTrack>,
    pub default_audio_index: u32,
    pub formats: Vec<&'static str>,
    /// Source container as lower-case extension, when recognisable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_format: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

fn source_path(source: &str) -> ApiResult<PathBuf> {
    let source = source.trim();
    if source.is_empty() {
        return Err(ApiError::bad_request("source is required"));
    }
    Ok(PathBuf::from(source))
}

/// GET /resolution?source=<path>&scale=<f>
pub async fn resolution(
    State(state): State<AppState>,
    Query(query): Query<ResolutionQuery>,
) -> ApiResult<Json<ResolutionResponse>> {
    let source = source_path(&query.source)?;
    let (width, height) = state.orchestrator.scaled_resolution(&source, query.scale).await;
    Ok(Json(ResolutionResponse {
        scaled: format!("{}x{}", width, height),
    }))
}

/// GET /tracks?source=<path>
pub async fn tracks(
    State(state): State<AppState>,
    Query(query): Query<TracksQuery>,
) -> ApiResult<Json<TracksResponse>> {
    let source = source_path(&query.source)?;
    let info = state.orchestrator.media_info(&source).await;

    let source_format = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    Ok(Json(TracksResponse {
        resolution: [info.width, info.height],
        default_audio_index: state.orchestrator.default_audio_index(&info),
        audio_tracks: info.audio_tracks,
        formats: OutputFormat::ALL.iter().map(|f| f.as_str()).collect(),
        source_format,
    }))
}
