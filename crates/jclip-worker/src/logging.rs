//! Structured job logging.

use tracing::{error, info, warn, Span};

use jclip_models::JobId;

/// Logs lifecycle events of one job under `job_id` and `operation` fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
    echo_encoder: bool,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
            echo_encoder: false,
        }
    }

    /// Also log each encoder output line.
    pub fn echo_encoder_output(mut self, enabled: bool) -> Self {
        self.echo_encoder = enabled;
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, operation = self.operation, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, operation = self.operation, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job completed: {}", message);
    }

    /// One line of encoder output, if echoing is enabled.
    pub fn log_encoder_line(&self, stream: &'static str, line: &str) {
        if self.echo_encoder {
            info!(job_id = %self.job_id, stream, "encoder: {}", line);
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span for the background task of this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "encode").echo_encoder_output(true);

        assert_eq!(logger.job_id(), job_id.as_str());
        assert_eq!(logger.operation(), "encode");
        assert!(logger.echo_encoder);
    }
}
