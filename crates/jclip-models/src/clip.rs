//! Clip requests, output formats and the computed encode window.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

use crate::timestamp::parse_timestamp;

/// Output container/codec family of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mkv,
    Avi,
    /// Audio-only
    Mp3,
    /// Animated image, no audio
    Gif,
}

impl OutputFormat {
    /// Every supported format, in the order offered to clients.
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Mp4,
        OutputFormat::Mkv,
        OutputFormat::Avi,
        OutputFormat::Mp3,
        OutputFormat::Gif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Avi => "avi",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Gif => "gif",
        }
    }

    /// File extension of the artifact.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Whether the artifact carries no video stream.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, OutputFormat::Mp3)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a format string names no supported format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported output format: {0}")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

fn default_format() -> String {
    OutputFormat::default().as_str().to_string()
}

fn default_scale_factor() -> f64 {
    1.0
}

/// A clip request as submitted by a client.
///
/// Only `source_path` is mandatory. Missing or malformed timestamps degrade to
/// the fallback window instead of rejecting the request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipRequest {
    /// Clip start, e.g. `00:00:10,000`
    #[serde(default)]
    pub start: Option<String>,
    /// Clip end, e.g. `00:00:15,000`
    #[serde(default)]
    pub end: Option<String>,
    /// Source media file
    #[serde(default)]
    #[validate(length(min = 1, message = "sourcePath is required"))]
    pub source_path: String,
    /// Output format name
    #[serde(default = "default_format")]
    pub format: String,
    /// Seconds added on both sides of the range
    #[serde(default)]
    pub padding: f64,
    /// Output size relative to the source resolution
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// Relative index of the audio stream to keep
    #[serde(default)]
    pub audio_index: u32,
}

impl ClipRequest {
    /// Padding actually applied: negative or non-finite values become 0.
    pub fn effective_padding(&self) -> f64 {
        if self.padding.is_finite() {
            self.padding.max(0.0)
        } else {
            0.0
        }
    }

    pub fn effective_scale(&self) -> f64 {
        effective_scale(self.scale_factor)
    }
}

/// Largest scale factor honoured; anything outside `(0, MAX_SCALE_FACTOR]`
/// falls back to the source size.
pub const MAX_SCALE_FACTOR: f64 = 4.0;

pub fn effective_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 && scale <= MAX_SCALE_FACTOR {
        scale
    } else {
        1.0
    }
}

/// Seek offset and duration handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipWindow {
    pub seek_secs: f64,
    pub duration_secs: f64,
    /// True when the fallback duration replaced the requested range
    pub degraded: bool,
}

impl ClipWindow {
    /// Apply symmetric padding to `[start, end]`.
    ///
    /// Unparseable or missing bounds yield `(0, fallback)`; a non-positive
    /// padded duration keeps the seek offset and uses `fallback` as duration.
    pub fn compute(start: Option<&str>, end: Option<&str>, padding: f64, fallback_secs: f64) -> Self {
        let bounds = start
            .zip(end)
            .map(|(s, e)| (parse_timestamp(s), parse_timestamp(e)));

        match bounds {
            Some((Ok(start), Ok(end))) => {
                let seek_secs = (start - padding).max(0.0);
                let duration_secs = (end + padding) - seek_secs;
                if duration_secs > 0.0 {
                    Self {
                        seek_secs,
                        duration_secs,
                        degraded: false,
                    }
                } else {
                    Self {
                        seek_secs,
                        duration_secs: fallback_secs,
                        degraded: true,
                    }
                }
            }
            _ => Self {
                seek_secs: 0.0,
                duration_secs: fallback_secs,
                degraded: true,
            },
        }
    }
}

/// Immutable encode parameters captured when a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipSpec {
    pub source_path: PathBuf,
    pub window: ClipWindow,
    pub format: OutputFormat,
    pub scale_factor: f64,
    pub audio_index: u32,
    /// Probed resolution of the source
    pub source_resolution: (u32, u32),
    /// Even-valued resolution of the output
    pub output_resolution: (u32, u32),
}

impl ClipSpec {
    /// Whether the encoder has to rescale the video.
    pub fn needs_scaling(&self) -> bool {
        (self.scale_factor - 1.0).abs() > f64::EPSILON
    }
}

/// Scale a resolution and round each dimension down to an even value.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let even = |dim: u32| -> u32 {
        let scaled = (dim as f64 * scale) as u32;
        (scaled - scaled % 2).max(2)
    };
    (even(width), even(height))
}

/// Deterministic artifact name for a clip.
///
/// `<Movie_Name>_<start>_to_<end>_<W>x<H>[p<padding>].<ext>` where the movie
/// name is the source's parent directory and the timestamps have `:` replaced
/// by `-` and `,` by `.`.
pub fn artifact_file_name(
    source: &Path,
    start: Option<&str>,
    end: Option<&str>,
    window: &ClipWindow,
    resolution: (u32, u32),
    padding: f64,
    format: OutputFormat,
) -> String {
    let movie_name = source
        .parent()
        .and_then(|p| p.file_name())
        .or_else(|| source.file_stem())
        .map(|n| n.to_string_lossy().replace(' ', "_"))
        .unwrap_or_else(|| "clip".to_string());

    let start = file_stamp(start, window.seek_secs);
    let end = file_stamp(end, window.seek_secs + window.duration_secs);
    let padding = if padding > 0.0 {
        format!("p{}", padding)
    } else {
        String::new()
    };

    format!(
        "{}_{}_to_{}_{}x{}{}.{}",
        sanitize(&movie_name),
        start,
        end,
        resolution.0,
        resolution.1,
        padding,
        format.extension()
    )
}

fn file_stamp(ts: Option<&str>, fallback_secs: f64) -> String {
    match ts.map(str::trim).filter(|t| !t.is_empty()) {
        Some(ts) => sanitize(&ts.replace(':', "-").replace(',', ".")),
        None => {
            let millis = (fallback_secs * 1000.0).round() as u64;
            format!(
                "{:02}-{:02}-{:02}.{:03}",
                millis / 3_600_000,
                (millis / 60_000) % 60,
                (millis / 1000) % 60,
                millis % 1000
            )
        }
    }
}

/// Keep names inside the output directory.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
