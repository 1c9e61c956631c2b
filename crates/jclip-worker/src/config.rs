//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Where finished clips are written
    pub output_dir: PathBuf,
    /// Job scratch root; wiped at startup
    pub temp_dir: PathBuf,
    /// Encoder binary
    pub ffmpeg_bin: PathBuf,
    /// Probe binary
    pub ffprobe_bin: PathBuf,
    /// Two-letter language used to pick the default audio track
    pub default_language: String,
    /// Echo every encoder output line to the service log
    pub ffmpeg_log_enabled: bool,
    /// Clip duration used when the requested range is unusable
    pub fallback_duration_secs: f64,
    /// How long a cancelled encoder may take to exit before it is killed
    pub kill_grace: Duration,
    /// Encoder thread count
    pub encoder_threads: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/output"),
            temp_dir: PathBuf::from("/tmp/jclipper"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            default_language: "en".to_string(),
            ffmpeg_log_enabled: true,
            fallback_duration_secs: 10.0,
            kill_grace: Duration::from_secs(10),
            encoder_threads: 4,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            ffmpeg_bin: std::env::var("FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: std::env::var("FFPROBE_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_bin),
            default_language: std::env::var("DEFAULT_LANGUAGE").unwrap_or(defaults.default_language),
            ffmpeg_log_enabled: std::env::var("FFMPEG_LOG_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.ffmpeg_log_enabled),
            fallback_duration_secs: std::env::var("FALLBACK_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|d| *d > 0.0)
                .unwrap_or(defaults.fallback_duration_secs),
            kill_grace: Duration::from_secs(
                std::env::var("KILL_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            encoder_threads: std::env::var("ENCODER_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.encoder_threads),
        }
    }

    /// Rooted at `base`, for tests and local runs.
    pub fn with_base_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            output_dir: base.join("output"),
            temp_dir: base.join("tmp"),
            ..Self::default()
        }
    }
}
