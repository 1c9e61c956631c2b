//! Job metrics.

use metrics::{counter, histogram};
use std::time::Duration;

pub mod names {
    pub const JOBS_STARTED: &str = "jclip_jobs_started_total";
    pub const JOBS_SUCCEEDED: &str = "jclip_jobs_succeeded_total";
    pub const JOBS_FAILED: &str = "jclip_jobs_failed_total";
    pub const JOBS_CANCELLED: &str = "jclip_jobs_cancelled_total";
    pub const ENCODE_DURATION: &str = "jclip_encode_duration_seconds";
}

pub fn record_job_started(format: &str) {
    counter!(names::JOBS_STARTED, "format" => format.to_string()).increment(1);
}

pub fn record_job_finished(format: &str, success: bool, elapsed: Duration) {
    let name = if success {
        names::JOBS_SUCCEEDED
    } else {
        names::JOBS_FAILED
    };
    counter!(name, "format" => format.to_string()).increment(1);
    histogram!(names::ENCODE_DURATION, "format" => format.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED).increment(1);
}
