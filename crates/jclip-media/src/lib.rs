//! FFmpeg CLI seams for clip encoding.
//!
//! This crate provides:
//! - The [`EncodeCommandBuilder`] trait and its FFmpeg implementation
//! - The [`MediaProber`] trait, its FFprobe implementation and a per-path cache

pub mod command;
pub mod error;
pub mod probe;

pub use command::{check_binary, EncodeCommandBuilder, EncoderInvocation, FfmpegCommand, FfmpegCommandBuilder};
pub use error::{MediaError, MediaResult};
pub use probe::{FfprobeProber, MediaInfo, MediaProber, OutputProbe, ProbeCache};
