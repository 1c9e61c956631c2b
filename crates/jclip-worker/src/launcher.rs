//! Synchronous half of a launch: everything that must be on disk, or claimed,
//! before the runner is dispatched.

use chrono::Utc;
use tracing::{info, warn};

use jclip_media::ProbeCache;
use jclip_models::{
    artifact_file_name, scaled_dimensions, ClipRequest, ClipSpec, JobHandle, JobId, OutputFormat,
};

use crate::config::OrchestratorConfig;
use crate::error::{JobError, JobResult};
use crate::history::HistoryIndex;
use crate::registry::ProcessRegistry;
use crate::runner::EncodeTask;
use crate::sentinel::JobDirectory;

/// Turn a request into a reserved job whose directory holds the `encoding`
/// marker, plus the task for its runner.
pub(crate) async fn prepare(
    config: &OrchestratorConfig,
    probes: &ProbeCache,
    registry: &ProcessRegistry,
    history: &HistoryIndex,
    epoch: &str,
    request: &ClipRequest,
) -> JobResult<(JobHandle, EncodeTask)> {
    let source = request.source_path.trim();
    if source.is_empty() {
        return Err(JobError::invalid_request("sourcePath is required"));
    }
    let source_path = std::path::PathBuf::from(source);
    let format: OutputFormat = request.format.parse()?;

    let padding = request.effective_padding();
    let scale_factor = request.effective_scale();

    let window = jclip_models::ClipWindow::compute(
        request.start.as_deref(),
        request.end.as_deref(),
        padding,
        config.fallback_duration_secs,
    );
    if window.degraded {
        warn!(
            start = ?request.start,
            end = ?request.end,
            fallback_secs = config.fallback_duration_secs,
            "Unusable clip range, using fallback duration"
        );
    }

    let info = probes.get(&source_path).await;
    let output_resolution = scaled_dimensions(info.width, info.height, scale_factor);

    let artifact_path = config.output_dir.join(artifact_file_name(
        &source_path,
        request.start.as_deref(),
        request.end.as_deref(),
        &window,
        output_resolution,
        padding,
        format,
    ));

    let spec = ClipSpec {
        source_path,
        window,
        format,
        scale_factor,
        audio_index: request.audio_index,
        source_resolution: info.resolution(),
        output_resolution,
    };

    let job_id = JobId::new();
    let directory = JobDirectory::create(&config.temp_dir, &job_id).await?;
    let stop = match registry.reserve(&job_id) {
        Ok(stop) => stop,
        Err(e) => {
            let _ = directory.remove().await;
            return Err(e);
        }
    };

    let gate = history.claim(&artifact_path, &job_id, directory.path());

    info!(
        job_id = %job_id,
        seek_secs = spec.window.seek_secs,
        duration_secs = spec.window.duration_secs,
        format = %format,
        artifact = %artifact_path.display(),
        "Job created"
    );

    let handle = JobHandle {
        job_id: job_id.clone(),
        directory: directory.path().to_path_buf(),
        artifact_path: artifact_path.clone(),
        format,
        audio_index: spec.audio_index,
        epoch: epoch.to_string(),
        created_at: Utc::now(),
    };

    let task = EncodeTask {
        job_id,
        directory,
        artifact_path,
        spec,
        stop,
        gate,
    };

    Ok((handle, task))
}
