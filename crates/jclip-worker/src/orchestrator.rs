//! The transcode job orchestrator.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use jclip_media::{
    EncodeCommandBuilder, FfmpegCommandBuilder, FfprobeProber, MediaInfo, MediaProber, ProbeCache,
};
use jclip_models::{
    default_audio_index, effective_scale, scaled_dimensions, ClipRequest, JobHandle, JobState,
};

use crate::config::OrchestratorConfig;
use crate::error::{JobError, JobResult};
use crate::history::{self, HistoryEntry, HistoryIndex};
use crate::launcher;
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::{ProcessRegistry, Termination};
use crate::runner::{EncodeRunner, RunOutcome};
use crate::sentinel::{ignore_not_found, JobDirectory};

/// Result of a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// The caller has no live job
    NoJob,
    Job { state: JobState, log: String },
}

/// Result of a cancel request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReport {
    /// An encoder process was found and signalled
    pub process_found: bool,
    pub directory_removed: bool,
    pub artifact_removed: bool,
    /// Cleanup steps that failed; the cancel itself still succeeds
    pub errors: Vec<String>,
}

/// A rendered preview inside a job directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// Result of a bulk cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub success: bool,
    pub files_removed: usize,
    pub jobs_terminated: usize,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    epoch: String,
    registry: Arc<ProcessRegistry>,
    history: Arc<HistoryIndex>,
    probes: Arc<ProbeCache>,
    runner: EncodeRunner,
}

impl Orchestrator {
    /// Start an orchestrator using FFmpeg and FFprobe from the config.
    pub async fn with_ffmpeg(config: OrchestratorConfig) -> JobResult<Self> {
        let encoder = Arc::new(FfmpegCommandBuilder::new(
            config.ffmpeg_bin.clone(),
            config.encoder_threads,
        ));
        let prober = Arc::new(FfprobeProber::new(config.ffprobe_bin.clone()));
        Self::start(config, encoder, prober).await
    }

    /// Wipe the scratch root, create the output area and begin a new run epoch.
    pub async fn start(
        config: OrchestratorConfig,
        encoder: Arc<dyn EncodeCommandBuilder>,
        prober: Arc<dyn MediaProber>,
    ) -> JobResult<Self> {
        let wiped = ignore_not_found(tokio::fs::remove_dir_all(&config.temp_dir).await)?;
        tokio::fs::create_dir_all(&config.temp_dir).await?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let epoch = Uuid::new_v4().to_string();
        info!(
            epoch = %epoch,
            temp_dir = %config.temp_dir.display(),
            output_dir = %config.output_dir.display(),
            wiped,
            "Orchestrator started"
        );

        let registry = Arc::new(ProcessRegistry::new());
        let history = Arc::new(HistoryIndex::new());
        let runner = EncodeRunner {
            registry: Arc::clone(&registry),
            encoder,
            prober: Arc::clone(&prober),
            history: Arc::clone(&history),
            kill_grace: config.kill_grace,
            echo_encoder: config.ffmpeg_log_enabled,
        };

        Ok(Self {
            epoch,
            registry,
            history,
            probes: Arc::new(ProbeCache::new(prober)),
            runner,
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token identifying this run; handles from other runs are stale.
    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn encoder_program(&self) -> &Path {
        self.runner.encoder.program()
    }

    /// Drop a handle issued by a previous run.
    pub fn reconcile(&self, handle: Option<JobHandle>) -> Option<JobHandle> {
        match handle {
            Some(h) if h.belongs_to(&self.epoch) => Some(h),
            Some(h) => {
                info!(job_id = %h.job_id, "Discarding job handle from a previous run");
                None
            }
            None => None,
        }
    }

    /// Create a job and dispatch its encode. Returns once the `encoding`
    /// marker is on disk; never waits for the encoder.
    pub async fn launch(&self, request: &ClipRequest) -> JobResult<JobHandle> {
        let (handle, task) = launcher::prepare(
            &self.config,
            &self.probes,
            &self.registry,
            &self.history,
            &self.epoch,
            request,
        )
        .await?;

        metrics::record_job_started(handle.format.as_str());

        let runner = self.runner.clone();
        let span = JobLogger::new(&handle.job_id, "encode").create_span();
        tokio::spawn(
            async move {
                let outcome = runner.run(task).await;
                if outcome == RunOutcome::Failed {
                    warn!("Encode finished without a usable artifact");
                }
            }
            .instrument(span),
        );

        Ok(handle)
    }

    /// Read the state of the caller's job. Never mutates anything.
    pub async fn status(&self, handle: Option<&JobHandle>) -> StatusReport {
        let Some(handle) = handle.filter(|h| h.belongs_to(&self.epoch)) else {
            return StatusReport::NoJob;
        };

        let dir = JobDirectory::at(&handle.directory);
        if !dir.exists().await {
            return StatusReport::NoJob;
        }

        StatusReport::Job {
            state: dir.state().await,
            log: dir.read_log().await.unwrap_or_default(),
        }
    }

    /// The caller's preview, once one has been rendered.
    pub async fn preview(&self, handle: Option<&JobHandle>) -> Option<PreviewInfo> {
        let handle = handle.filter(|h| h.belongs_to(&self.epoch))?;
        let dir = JobDirectory::at(&handle.directory);
        let size = dir.preview_size().await?;
        Some(PreviewInfo {
            path: dir.preview_path(),
            size,
        })
    }

    /// Terminate the caller's job if running and remove everything it left.
    ///
    /// Idempotent; individual cleanup failures are reported, not raised.
    pub async fn cancel(&self, handle: Option<&JobHandle>) -> CancelReport {
        let mut report = CancelReport::default();
        let Some(handle) = handle.filter(|h| h.belongs_to(&self.epoch)) else {
            return report;
        };

        // None once the job's claim has been released
        let gate = self.history.gate(&handle.artifact_path, &handle.job_id);
        let _guard = match &gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let termination = self.registry.terminate(&handle.job_id);
        report.process_found = termination.found_process();
        if let Termination::Signalled { pid } = termination {
            info!(job_id = %handle.job_id, pid = ?pid, "Termination requested");
        }

        match JobDirectory::at(&handle.directory).remove().await {
            Ok(removed) => report.directory_removed = removed,
            Err(e) => {
                error!(job_id = %handle.job_id, error = %e, "Failed to remove job directory");
                report.errors.push(format!("{}: {}", handle.directory.display(), e));
            }
        }

        if self.history.release(&handle.artifact_path, &handle.job_id) {
            match ignore_not_found(tokio::fs::remove_file(&handle.artifact_path).await) {
                Ok(removed) => report.artifact_removed = removed,
                Err(e) => {
                    error!(job_id = %handle.job_id, error = %e, "Failed to remove artifact");
                    report.errors.push(format!("{}: {}", handle.artifact_path.display(), e));
                }
            }
        } else {
            info!(
                job_id = %handle.job_id,
                artifact = %handle.artifact_path.display(),
                "Artifact kept, claimed by another job"
            );
        }

        info!(
            job_id = %handle.job_id,
            process_found = report.process_found,
            directory_removed = report.directory_removed,
            artifact_removed = report.artifact_removed,
            "Job cancelled"
        );
        report
    }

    /// Finished artifacts in the output area.
    pub async fn history(&self) -> JobResult<Vec<HistoryEntry>> {
        Ok(history::list_artifacts(&self.config.output_dir).await?)
    }

    /// Delete one artifact and the directories of every job known to target it.
    pub async fn delete_artifact(&self, path: &Path) -> JobResult<()> {
        if !history::is_within(&self.config.output_dir, path) {
            warn!(path = %path.display(), "Refusing to delete outside the output directory");
            return Err(JobError::OutsideOutputDir(path.display().to_string()));
        }

        if ignore_not_found(tokio::fs::remove_file(path).await)? {
            info!(path = %path.display(), "Deleted artifact");
        }

        for job_dir in self.history.remove(path) {
            if let Err(e) = JobDirectory::at(&job_dir).remove().await {
                warn!(job_dir = %job_dir.display(), error = %e, "Failed to remove job directory");
            }
        }
        Ok(())
    }

    /// Stop every job and wipe both the output area and the scratch root.
    pub async fn clear_all(&self) -> ClearReport {
        let mut report = ClearReport {
            success: true,
            jobs_terminated: self.registry.terminate_all(),
            ..ClearReport::default()
        };

        match remove_files(&self.config.output_dir).await {
            Ok((removed, failed)) => {
                report.files_removed = removed;
                if failed > 0 {
                    report.success = false;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read output directory");
                report.success = false;
            }
        }

        let reset = async {
            ignore_not_found(tokio::fs::remove_dir_all(&self.config.temp_dir).await)?;
            tokio::fs::create_dir_all(&self.config.temp_dir).await
        };
        if let Err(e) = reset.await {
            error!(error = %e, "Failed to clear scratch root");
            report.success = false;
        }

        self.history.clear();
        info!(
            files_removed = report.files_removed,
            jobs_terminated = report.jobs_terminated,
            success = report.success,
            "Cleared all clips"
        );
        report
    }

    /// Cached probe of a source file.
    pub async fn media_info(&self, source: &Path) -> MediaInfo {
        self.probes.get(source).await
    }

    /// Audio track chosen when the caller does not pick one.
    pub fn default_audio_index(&self, info: &MediaInfo) -> u32 {
        default_audio_index(&info.audio_tracks, &self.config.default_language)
    }

    /// Output resolution of `source` at `scale`.
    pub async fn scaled_resolution(&self, source: &Path, scale: f64) -> (u32, u32) {
        let info = self.probes.get(source).await;
        scaled_dimensions(info.width, info.height, effective_scale(scale))
    }
}

/// Remove regular files directly inside `dir`. Returns (removed, failed).
async fn remove_files(dir: &Path) -> io::Result<(usize, usize)> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e),
    };

    let (mut removed, mut failed) = (0, 0);
    while let Some(entry) = read_dir.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        match ignore_not_found(tokio::fs::remove_file(entry.path()).await) {
            Ok(_) => removed += 1,
            Err(e) => {
                error!(path = %entry.path().display(), error = %e, "Failed to delete file");
                failed += 1;
            }
        }
    }
    Ok((removed, failed))
}
