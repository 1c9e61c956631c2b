//! Shared data models for the JClipper transcode service.
//!
//! Types here cross crate boundaries: the API hands [`ClipRequest`]s to the
//! worker, and the worker hands [`JobHandle`]s back for the session to keep.

pub mod clip;
pub mod job;
pub mod timestamp;
pub mod track;

pub use clip::{
    artifact_file_name, effective_scale, scaled_dimensions, ClipRequest, ClipSpec, ClipWindow, OutputFormat,
    UnknownFormat, MAX_SCALE_FACTOR,
};
pub use job::{JobHandle, JobId, JobState};
pub use timestamp::{parse_timestamp, TimestampError};
pub use track::{default_audio_index, language_code, AudioTrack};
