//! Job identity and lifecycle types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::OutputFormat;

/// Unique identifier for a transcode job.
///
/// Rendered as 32 lowercase hex characters so it can double as the name of
/// the job's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job state as observed through the job's sentinel files.
///
/// This value is never stored; it is recomputed from disk on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Encoder is running (or about to run)
    Encoding,
    /// Encoder exited cleanly and produced a non-empty artifact
    Success,
    /// Encoder failed, or exited cleanly without producing output
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Encoding => "encoding",
            JobState::Success => "success",
            JobState::Failure => "failure",
        }
    }

    /// Check if this is a terminal state (no more transitions for this job id).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The caller's reference to its current job.
///
/// Returned by the orchestrator when a job is launched; the caller keeps it
/// (e.g. in its session) and hands it back for status and cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    /// Job identifier
    pub job_id: JobId,
    /// Exclusive scratch directory of the job
    pub directory: PathBuf,
    /// Where the finished artifact will be written
    pub artifact_path: PathBuf,
    /// Output format of the artifact
    pub format: OutputFormat,
    /// Audio track selected for the encode
    pub audio_index: u32,
    /// Run epoch of the orchestrator that created the job
    pub epoch: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl JobHandle {
    /// Whether the handle was issued by an orchestrator running under `epoch`.
    pub fn belongs_to(&self, epoch: &str) -> bool {
        self.epoch == epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_unique_hex() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_state_terminality() {
        assert!(!JobState::Encoding.is_terminal());
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Failure.is_terminal());
        assert_eq!(JobState::Failure.to_string(), "failure");
    }

    #[test]
    fn test_job_state_serializes_lowercase() {
        let json = serde_json::to_string(&JobState::Encoding).unwrap();
        assert_eq!(json, "\"encoding\"");
    }
}
