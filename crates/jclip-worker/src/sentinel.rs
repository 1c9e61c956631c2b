//! Per-job marker files.
//!
//! A job's state lives entirely in its directory:
//!
//! | file       | meaning                                   |
//! |------------|-------------------------------------------|
//! | `encoding` | the encoder has not finished              |
//! | `success`  | the encoder produced a usable artifact    |
//! | `log.txt`  | captured encoder output and probe notes   |
//! | `preview.mp4` | low-resolution preview, when one was made |
//!
//! `encoding` takes precedence over `success`, and the absence of both means
//! failure. The runner writes the log and `success` before it removes
//! `encoding`, so a poller never observes a job without a state.

use std::io;
use std::path::{Path, PathBuf};

use jclip_models::{JobId, JobState};

pub const ENCODING_MARKER: &str = "encoding";
pub const SUCCESS_MARKER: &str = "success";
pub const LOG_FILE: &str = "log.txt";
pub const PREVIEW_FILE: &str = "preview.mp4";

/// Accessor for one job's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirectory {
    path: PathBuf,
}

impl JobDirectory {
    /// Wrap an existing job directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a fresh directory for `job_id` under `root` holding only the
    /// `encoding` marker.
    pub async fn create(root: &Path, job_id: &JobId) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let path = root.join(job_id.as_str());
        tokio::fs::create_dir(&path).await?;
        tokio::fs::write(path.join(ENCODING_MARKER), b"").await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preview_path(&self) -> PathBuf {
        self.path.join(PREVIEW_FILE)
    }

    /// Size of the preview, or `None` if there is no usable one.
    pub async fn preview_size(&self) -> Option<u64> {
        tokio::fs::metadata(self.preview_path())
            .await
            .ok()
            .map(|m| m.len())
            .filter(|len| *len > 0)
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn has(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path.join(name))
            .await
            .unwrap_or(false)
    }

    /// Compute the job state from the markers on disk.
    pub async fn state(&self) -> JobState {
        if self.has(ENCODING_MARKER).await {
            JobState::Encoding
        } else if self.has(SUCCESS_MARKER).await {
            JobState::Success
        } else {
            JobState::Failure
        }
    }

    /// Log contents, or `None` if no log has been written yet.
    pub async fn read_log(&self) -> Option<String> {
        tokio::fs::read(self.path.join(LOG_FILE))
            .await
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn write_log(&self, contents: &str) -> io::Result<()> {
        tokio::fs::write(self.path.join(LOG_FILE), contents).await
    }

    pub async fn mark_success(&self) -> io::Result<()> {
        tokio::fs::write(self.path.join(SUCCESS_MARKER), b"").await
    }

    /// Remove the `encoding` marker. Must be the last write of a run.
    pub async fn finish_encoding(&self) -> io::Result<()> {
        ignore_not_found(tokio::fs::remove_file(self.path.join(ENCODING_MARKER)).await).map(|_| ())
    }

    /// Delete the directory. Returns false if it was already gone.
    pub async fn remove(&self) -> io::Result<bool> {
        ignore_not_found(tokio::fs::remove_dir_all(&self.path).await)
    }
}

/// Map `NotFound` to `Ok(false)`, success to `Ok(true)`.
pub(crate) fn ignore_not_found(result: io::Result<()>) -> io::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
