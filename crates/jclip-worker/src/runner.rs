//! Background encode routine.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use jclip_media::{EncodeCommandBuilder, EncoderInvocation, MediaProber};
use jclip_models::{ClipSpec, JobId};

use crate::history::HistoryIndex;
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::ProcessRegistry;
use crate::sentinel::{ignore_not_found, JobDirectory};

/// Everything one encode needs, captured at launch.
#[derive(Debug)]
pub struct EncodeTask {
    pub job_id: JobId,
    pub directory: JobDirectory,
    pub artifact_path: PathBuf,
    pub spec: ClipSpec,
    pub stop: watch::Receiver<bool>,
    /// Held for terminal writes; cancellation takes it before tearing down
    pub gate: Arc<AsyncMutex<()>>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// Terminated by a cancel request; no terminal markers were written
    Cancelled,
}

/// Captured encoder output.
#[derive(Debug, Default)]
struct Capture {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl Capture {
    fn from_status(status: &ExitStatus, stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: status.code(),
        }
    }

    fn spawn_failed(error: impl std::fmt::Display) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("failed to start encoder: {}", error),
            exit_code: None,
        }
    }

    fn render(&self) -> String {
        format!(
            "stdout: {}\nstderr: {}\nreturncode: {}",
            self.stdout,
            self.stderr,
            self.exit_code.unwrap_or(-1)
        )
    }
}

enum Execution {
    Exited(Capture),
    Cancelled,
}

/// Shared collaborators of every encode run.
#[derive(Clone)]
pub struct EncodeRunner {
    pub(crate) registry: Arc<ProcessRegistry>,
    pub(crate) encoder: Arc<dyn EncodeCommandBuilder>,
    pub(crate) prober: Arc<dyn MediaProber>,
    pub(crate) history: Arc<HistoryIndex>,
    pub(crate) kill_grace: Duration,
    pub(crate) echo_encoder: bool,
}

impl EncodeRunner {
    /// Run one job to a terminal state.
    ///
    /// Unless cancelled, the last disk operation is removal of the `encoding`
    /// marker, after the log and the `success` marker are written.
    pub async fn run(&self, task: EncodeTask) -> RunOutcome {
        let logger = JobLogger::new(&task.job_id, "encode").echo_encoder_output(self.echo_encoder);
        let started = Instant::now();

        if !self.registry.is_reserved(&task.job_id) {
            return self.cancelled(&task, &logger, "cancelled before the encoder started").await;
        }

        let Some(preview_note) = self.preview(&task, &logger).await else {
            return self.cancelled(&task, &logger, "cancelled while rendering the preview").await;
        };

        let invocation = self.encoder.build(&task.spec, &task.artifact_path);
        logger.log_start(&invocation.display());

        let capture = match self.execute(&task, &invocation, &logger).await {
            Execution::Exited(capture) => capture,
            Execution::Cancelled => return self.cancelled(&task, &logger, "cancelled").await,
        };

        let gate = task.gate.lock().await;

        // A cancel that raced the natural exit already owns the cleanup
        if !self.registry.clear(&task.job_id) {
            drop(gate);
            return self.cancelled(&task, &logger, "cancelled after exit").await;
        }

        let artifact_size = tokio::fs::metadata(&task.artifact_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let produced = capture.exit_code == Some(0) && artifact_size > 0;

        let mut log = capture.render();
        if produced {
            log.push_str(&self.probe_note(&task, &logger).await);
        } else {
            logger.log_error(&format!(
                "encoder failed: returncode={:?}, artifact_size={}",
                capture.exit_code, artifact_size
            ));
            self.abandon_artifact(&task, &logger).await;
        }
        log.push_str(&preview_note);

        let succeeded = self.finish(&task, &log, produced, &logger).await;
        drop(gate);

        if succeeded {
            logger.log_completion(&format!(
                "{} ({} bytes)",
                task.artifact_path.display(),
                artifact_size
            ));
        }

        metrics::record_job_finished(task.spec.format.as_str(), succeeded, started.elapsed());
        if succeeded {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        }
    }

    async fn cancelled(&self, task: &EncodeTask, logger: &JobLogger, note: &str) -> RunOutcome {
        let _gate = task.gate.lock().await;
        self.abandon_artifact(task, logger).await;
        logger.log_completion(note);
        metrics::record_job_cancelled();
        RunOutcome::Cancelled
    }

    /// Render the low-resolution preview into the job directory.
    ///
    /// Returns the note for the job log, or `None` if the job was cancelled
    /// meanwhile. A missing or broken preview never fails the job.
    async fn preview(&self, task: &EncodeTask, logger: &JobLogger) -> Option<String> {
        let path = task.directory.preview_path();
        let invocation = self.encoder.build_preview(&task.spec, &path);
        logger.log_progress(&format!("rendering preview: {}", invocation.display()));

        let mut child = match Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                logger.log_warning(&format!("failed to start preview: {}", e));
                return Some("\nPreview: Failed to start".to_string());
            }
        };
        let stderr = drain(child.stderr.take(), "preview", logger.clone());

        let mut stop = task.stop.clone();
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop.changed() => None,
        };

        let exited = match waited {
            Some(Ok(status)) => status.success(),
            Some(Err(e)) => {
                logger.log_warning(&format!("failed to wait for preview: {}", e));
                false
            }
            None => {
                self.stop_child(&mut child, logger).await;
                stderr.abort();
                self.discard_preview(task, logger).await;
                return None;
            }
        };
        let _ = stderr.await;

        let Some(size) = task.directory.preview_size().await else {
            logger.log_warning("preview is missing or empty");
            self.discard_preview(task, logger).await;
            return Some("\nPreview: Failed".to_string());
        };
        if !exited {
            logger.log_warning("preview encoder exited with an error");
        }

        match self.prober.probe_output(&path).await {
            Ok(probe) if probe.duration == Some(0.0) => {
                logger.log_warning("preview has zero duration");
                self.discard_preview(task, logger).await;
                Some("\nPreview: Failed".to_string())
            }
            Ok(_) => Some(format!("\nPreview: {} bytes", size)),
            Err(e) => {
                logger.log_warning(&format!("failed to probe preview, keeping it: {}", e));
                Some(format!("\nPreview: {} bytes", size))
            }
        }
    }

    /// Spawn the encoder, drain its pipes and wait for exit or a stop request.
    async fn execute(
        &self,
        task: &EncodeTask,
        invocation: &EncoderInvocation,
        logger: &JobLogger,
    ) -> Execution {
        let mut child = match Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                logger.log_error(&format!("failed to spawn {}: {}", invocation.program.display(), e));
                return Execution::Exited(Capture::spawn_failed(e));
            }
        };

        match self.registry.register(&task.job_id, child.id()) {
            Ok(true) => {}
            Ok(false) => {
                logger.log_warning("cancelled while the encoder was starting");
                let _ = child.kill().await;
                return Execution::Cancelled;
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                let _ = child.kill().await;
                return Execution::Exited(Capture::spawn_failed(e));
            }
        }

        let stdout = drain(child.stdout.take(), "stdout", logger.clone());
        let stderr = drain(child.stderr.take(), "stderr", logger.clone());

        let mut stop = task.stop.clone();
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop.changed() => None,
        };

        match waited {
            Some(Ok(status)) => {
                let stdout = stdout.await.unwrap_or_default();
                let stderr = stderr.await.unwrap_or_default();
                logger.log_progress(&format!("encoder exited with {}", status));
                Execution::Exited(Capture::from_status(&status, stdout, stderr))
            }
            Some(Err(e)) => {
                stdout.abort();
                stderr.abort();
                logger.log_error(&format!("failed to wait for encoder: {}", e));
                Execution::Exited(Capture {
                    stderr: format!("failed to wait for encoder: {}", e),
                    ..Capture::default()
                })
            }
            None => {
                self.stop_child(&mut child, logger).await;
                stdout.abort();
                stderr.abort();
                Execution::Cancelled
            }
        }
    }

    /// Ask the encoder to exit, then kill it after the grace period.
    async fn stop_child(&self, child: &mut Child, logger: &JobLogger) {
        if let Err(e) = request_stop(child) {
            logger.log_warning(&format!("failed to signal encoder: {}", e));
        }

        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
            logger.log_warning(&format!(
                "encoder still running after {:?}, killing",
                self.kill_grace
            ));
            if let Err(e) = child.kill().await {
                logger.log_error(&format!("failed to kill encoder: {}", e));
            }
        }
    }

    /// Diagnostic lines about the produced artifact. Never fails the job.
    async fn probe_note(&self, task: &EncodeTask, logger: &JobLogger) -> String {
        let audio_only = task.spec.format.is_audio_only();
        match self.prober.probe_output(&task.artifact_path).await {
            Ok(probe) => {
                let mut note = String::new();
                if !audio_only {
                    match probe.resolution {
                        Some((w, h)) => note.push_str(&format!("\nOutput resolution: {}x{}", w, h)),
                        None => note.push_str("\nOutput resolution: Failed to probe"),
                    }
                }
                if let Some(duration) = probe.duration {
                    note.push_str(&format!("\nOutput duration: {:.3}s", duration));
                }
                note
            }
            Err(e) => {
                logger.log_warning(&format!("failed to probe output: {}", e));
                if audio_only {
                    "\nOutput duration: Failed to probe".to_string()
                } else {
                    "\nOutput resolution: Failed to probe".to_string()
                }
            }
        }
    }

    /// Terminal transition. Returns whether the job ended in success.
    async fn finish(&self, task: &EncodeTask, log: &str, produced: bool, logger: &JobLogger) -> bool {
        let dir = &task.directory;

        if let Err(e) = dir.write_log(log).await {
            logger.log_error(&format!("failed to write log: {}", e));
        }

        let succeeded = if produced {
            match dir.mark_success().await {
                Ok(()) => true,
                Err(e) => {
                    logger.log_error(&format!("failed to write success marker: {}", e));
                    false
                }
            }
        } else {
            false
        };

        if let Err(e) = dir.finish_encoding().await {
            logger.log_error(&format!("failed to remove encoding marker: {}", e));
        }

        succeeded
    }

    /// Give up this job's claim on the artifact, deleting the file when no
    /// other job claims it.
    async fn abandon_artifact(&self, task: &EncodeTask, logger: &JobLogger) {
        if !self.history.release(&task.artifact_path, &task.job_id) {
            logger.log_progress(&format!(
                "keeping {}, another job claims it",
                task.artifact_path.display()
            ));
            return;
        }
        remove_logged(&task.artifact_path, logger).await;
    }

    async fn discard_preview(&self, task: &EncodeTask, logger: &JobLogger) {
        remove_logged(&task.directory.preview_path(), logger).await;
    }
}

async fn remove_logged(path: &Path, logger: &JobLogger) {
    match ignore_not_found(tokio::fs::remove_file(path).await) {
        Ok(true) => logger.log_progress(&format!("removed {}", path.display())),
        Ok(false) => {}
        Err(e) => logger.log_warning(&format!("failed to remove {}: {}", path.display(), e)),
    }
}

/// Collect a pipe line by line, echoing through the job logger.
fn drain<R>(reader: Option<R>, stream: &'static str, logger: JobLogger) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return String::new();
        };

        let mut reader = BufReader::new(reader);
        let mut lines = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    logger.log_encoder_line(stream, &line);
                    lines.push(line);
                }
            }
        }
        lines.join("\n")
    })
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // The child is not reaped until wait() returns, so its pid is still ours
    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
