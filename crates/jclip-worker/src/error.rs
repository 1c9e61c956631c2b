//! Orchestrator error types.

use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    UnknownFormat(#[from] jclip_models::UnknownFormat),

    #[error("Job {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Path is outside the output directory: {0}")]
    OutsideOutputDir(String),

    #[error("Media error: {0}")]
    Media(#[from] jclip_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidRequest(_) | JobError::UnknownFormat(_) | JobError::OutsideOutputDir(_)
        )
    }
}
