//! HTTP surface tests against the router with a scripted encoder.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use jclip_api::{create_router, ApiConfig, AppState};
use jclip_media::{EncodeCommandBuilder, EncoderInvocation, MediaInfo, MediaProber, MediaResult, OutputProbe};
use jclip_models::{AudioTrack, ClipSpec};
use jclip_worker::{Orchestrator, OrchestratorConfig};

struct ScriptEncoder {
    script: &'static str,
}

impl EncodeCommandBuilder for ScriptEncoder {
    fn build(&self, _spec: &ClipSpec, output: &Path) -> EncoderInvocation {
        EncoderInvocation {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                self.script.to_string(),
                "sh".to_string(),
                output.to_string_lossy().to_string(),
            ],
        }
    }

    fn build_preview(&self, _spec: &ClipSpec, output: &Path) -> EncoderInvocation {
        EncoderInvocation {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                r#"printf 'preview' > "$1""#.to_string(),
                "sh".to_string(),
                output.to_string_lossy().to_string(),
            ],
        }
    }

    fn program(&self) -> &Path {
        Path::new("sh")
    }
}

struct StaticProber;

#[async_trait]
impl MediaProber for StaticProber {
    async fn probe(&self, _source: &Path) -> MediaResult<MediaInfo> {
        Ok(MediaInfo {
            width: 1280,
            height: 720,
            audio_tracks: vec![
                AudioTrack::new(1, Some("eng"), Some("aac"), Some(2)),
                AudioTrack::new(2, Some("fre"), Some("ac3"), Some(6)),
            ],
        })
    }

    async fn probe_output(&self, _artifact: &Path) -> MediaResult<OutputProbe> {
        Ok(OutputProbe::default())
    }
}

const SUCCEED: &str = r#"sleep 0.3; echo done; printf 'clip' > "$1""#;
const HANG: &str = r#"printf 'partial' > "$1"; exec sleep 30"#;

async fn orchestrator(base: &Path, script: &'static str) -> Arc<Orchestrator> {
    let config = OrchestratorConfig {
        ffmpeg_log_enabled: false,
        kill_grace: Duration::from_secs(2),
        ..OrchestratorConfig::with_base_dir(base)
    };
    let orchestrator = Orchestrator::start(config, Arc::new(ScriptEncoder { script }), Arc::new(StaticProber))
        .await
        .unwrap();
    Arc::new(orchestrator)
}

async fn app_state(base: &Path, script: &'static str) -> AppState {
    AppState::with_orchestrator(ApiConfig::default(), orchestrator(base, script).await)
}

/// Minimal cookie-carrying client.
struct Client {
    app: Router,
    cookie: Option<String>,
}

impl Client {
    fn new(state: AppState) -> Self {
        Self {
            app: create_router(state, None),
            cookie: None,
        }
    }

    async fn send(&mut self, request: axum::http::request::Builder, body: Body) -> (StatusCode, Value) {
        let request = match &self.cookie {
            Some(cookie) => request.header(header::COOKIE, cookie),
            None => request,
        };
        let response = self.app.clone().oneshot(request.body(body).unwrap()).await.unwrap();

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri), Body::empty()).await
    }

    async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        self.send(request, Body::from(body.to_string())).await
    }

    async fn wait_for_status(&mut self, wanted: &str) -> Value {
        for _ in 0..500 {
            let (_, body) = self.get("/status").await;
            if body["status"] == wanted {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("status never became {}", wanted);
    }
}

fn clip_body() -> Value {
    json!({
        "start": "00:00:10,000",
        "end": "00:00:15,000",
        "sourcePath": "/movies/Film/film.mkv",
        "format": "mp4",
        "padding": 2
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generate_accepts_and_status_follows_job() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (status, body) = client.post("/generate", clip_body()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "encoding");
    assert_eq!(body["format"], "mp4");
    assert!(body["jobId"].is_string());
    assert!(client.cookie.as_deref().unwrap().starts_with("jclip_session="));

    let (_, polled) = client.get("/status").await;
    assert_eq!(polled["status"], "encoding");

    let done = client.wait_for_status("success").await;
    assert!(done["log"].as_str().unwrap().contains("returncode: 0"));
    assert!(Path::new(body["outputFile"].as_str().unwrap()).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generate_tolerates_out_of_range_padding_and_scale() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let mut body = clip_body();
    body["padding"] = json!(-1);
    body["scaleFactor"] = json!(8);

    let (status, accepted) = client.post("/generate", body).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(accepted["outputFile"].as_str().unwrap().contains("1280x720"));
    client.wait_for_status("success").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_with_identical_requests_stay_independent() {
    let base = TempDir::new().unwrap();
    let state = app_state(base.path(), SUCCEED).await;
    let mut first = Client::new(state.clone());
    let mut second = Client::new(state);

    let (_, a) = first.post("/generate", clip_body()).await;
    let (_, b) = second.post("/generate", clip_body()).await;
    assert_ne!(first.cookie, second.cookie);
    assert_ne!(a["jobId"], b["jobId"]);
    assert_eq!(a["outputFile"], b["outputFile"]);

    first.wait_for_status("success").await;
    second.wait_for_status("success").await;

    let (_, ack) = first.get("/cancel").await;
    assert_eq!(ack["status"], "cancelled");
    let (_, polled) = first.get("/status").await;
    assert_eq!(polled["status"], "error");

    let (_, polled) = second.get("/status").await;
    assert_eq!(polled["status"], "success");
    assert!(Path::new(b["outputFile"].as_str().unwrap()).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generate_again_leaves_previous_job_on_disk() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (_, first) = client.post("/generate", clip_body()).await;
    client.wait_for_status("success").await;
    let first_dir = base.path().join("tmp").join(first["jobId"].as_str().unwrap());
    let first_output = PathBuf::from(first["outputFile"].as_str().unwrap());

    let mut next = clip_body();
    next["start"] = json!("00:00:20,000");
    next["end"] = json!("00:00:25,000");
    let (status, second) = client.post("/generate", next).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_ne!(second["outputFile"], first["outputFile"]);

    client.wait_for_status("success").await;
    assert!(first_dir.join("success").exists());
    assert!(first_output.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preview_follows_session_job() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (status, body) = client.get("/preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "No preview");

    let (_, generated) = client.post("/generate", clip_body()).await;
    client.wait_for_status("success").await;

    let (_, body) = client.get("/preview").await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["preview"]["size"], 7);
    let path = PathBuf::from(body["preview"]["path"].as_str().unwrap());
    assert!(path.ends_with("preview.mp4"));
    assert!(path.starts_with(base.path().join("tmp").join(generated["jobId"].as_str().unwrap())));

    client.get("/cancel").await;
    let (_, body) = client.get("/preview").await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn status_without_job_reports_error() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (status, body) = client.get("/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "No job directory");
    assert_eq!(body["log"], "");
}

#[tokio::test]
async fn generate_rejects_missing_source() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (status, body) = client.post("/generate", json!({"start": "00:00:01,000"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("sourcePath"));

    let (status, _) = client
        .post("/generate", json!({"sourcePath": "/movies/a.mkv", "format": "webm"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(std::fs::read_dir(base.path().join("tmp")).unwrap().next().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_discards_running_job() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), HANG).await);

    let (_, body) = client.post("/generate", clip_body()).await;
    let artifact = PathBuf::from(body["outputFile"].as_str().unwrap());

    let (status, ack) = client.get("/cancel?next=history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "cancelled");
    assert_eq!(ack["next"], "history");

    let (_, polled) = client.get("/status").await;
    assert_eq!(polled["status"], "error");

    for _ in 0..250 {
        if !artifact.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!artifact.exists());

    // Idempotent
    let (status, ack) = client.get("/cancel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["next"], "index");
    assert_eq!(ack["processFound"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_lists_and_deletes_artifacts() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (_, body) = client.post("/generate", clip_body()).await;
    client.wait_for_status("success").await;
    let output_file = body["outputFile"].as_str().unwrap().to_string();

    let (_, listing) = client.get("/history").await;
    let files = listing["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["path"], output_file.as_str());
    assert_eq!(files[0]["size"], 4);

    let (_, refused) = client.post("/delete", json!({"filePath": "/etc/passwd"})).await;
    assert_eq!(refused["success"], false);
    assert_eq!(refused["message"], "Invalid file path");

    let (_, deleted) = client.post("/delete", json!({"filePath": output_file})).await;
    assert_eq!(deleted["success"], true);
    assert!(!Path::new(&output_file).exists());

    let (_, listing) = client.get("/history").await;
    assert!(listing["files"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_all_wipes_outputs_and_binding() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    client.post("/generate", clip_body()).await;
    client.wait_for_status("success").await;

    let (status, body) = client.post("/clear_all", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, listing) = client.get("/history").await;
    assert!(listing["files"].as_array().unwrap().is_empty());

    let (_, polled) = client.get("/status").await;
    assert_eq!(polled["status"], "error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_invalidates_session_job() {
    let base = TempDir::new().unwrap();
    let state = app_state(base.path(), HANG).await;
    let mut client = Client::new(state.clone());

    client.post("/generate", clip_body()).await;
    let (_, polled) = client.get("/status").await;
    assert_eq!(polled["status"], "encoding");

    let restarted = AppState {
        orchestrator: orchestrator(base.path(), HANG).await,
        ..state
    };
    client.app = create_router(restarted, None);

    let (_, polled) = client.get("/status").await;
    assert_eq!(polled["status"], "error");
}

#[tokio::test]
async fn media_lookups_use_probe() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (_, scaled) = client.get("/resolution?source=/movies/a.mkv&scale=0.5").await;
    assert_eq!(scaled["scaled"], "640x360");

    let (_, tracks) = client.get("/tracks?source=/movies/a.mkv").await;
    assert_eq!(tracks["resolution"], json!([1280, 720]));
    assert_eq!(tracks["defaultAudioIndex"], 0);
    assert_eq!(tracks["audioTracks"].as_array().unwrap().len(), 2);
    assert_eq!(tracks["formats"].as_array().unwrap().len(), 5);
    assert_eq!(tracks["sourceFormat"], "mkv");

    let (status, _) = client.get("/tracks?source=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_sets_common_headers() {
    let base = TempDir::new().unwrap();
    let app = create_router(app_state(base.path(), SUCCEED).await, None);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn ready_checks_dirs_and_encoder() {
    let base = TempDir::new().unwrap();
    let mut client = Client::new(app_state(base.path(), SUCCEED).await);

    let (status, body) = client.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["encoder"]["status"], "ok");

    std::fs::remove_dir_all(base.path().join("output")).unwrap();
    let (status, body) = client.get("/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["output_dir"]["status"], "error");
}
