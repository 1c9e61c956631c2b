//! Health check handlers.

use std::path::Path;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use jclip_media::check_binary;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub output_dir: CheckStatus,
    pub temp_dir: CheckStatus,
    pub encoder: CheckStatus,
}

impl ReadinessChecks {
    fn all_ok(&self) -> bool {
        [&self.output_dir, &self.temp_dir, &self.encoder]
            .iter()
            .all(|c| c.error.is_none())
    }
}

/// Outcome of one readiness check.
#[derive(Serialize)]
pub struct CheckStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn timed<T, E: std::fmt::Display>(started: Instant, result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }
}

/// Write and remove a probe file in `dir`.
async fn check_writable(dir: &Path) -> CheckStatus {
    let started = Instant::now();
    let probe = dir.join(format!(".ready-{}", Uuid::new_v4().simple()));
    let result = async {
        tokio::fs::write(&probe, b"").await?;
        tokio::fs::remove_file(&probe).await
    }
    .await
    .map_err(|e| format!("{}: {}", dir.display(), e));

    CheckStatus::timed(started, result)
}

/// Readiness probe: both working areas writable and the encoder on PATH.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let config = state.orchestrator.config();

    let checks = ReadinessChecks {
        output_dir: check_writable(&config.output_dir).await,
        temp_dir: check_writable(&config.temp_dir).await,
        encoder: CheckStatus::timed(Instant::now(), check_binary(state.orchestrator.encoder_program())),
    };

    if checks.all_ok() {
        (StatusCode::OK, Json(ReadinessResponse { status: "ready", checks }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "degraded",
                checks,
            }),
        )
    }
}
