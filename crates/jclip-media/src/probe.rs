//! FFprobe media information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use jclip_models::AudioTrack;

use crate::error::{MediaError, MediaResult};

/// Resolution assumed when a source cannot be probed.
pub const FALLBACK_RESOLUTION: (u32, u32) = (1920, 1080);

/// What the launcher needs to know about a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub audio_tracks: Vec<AudioTrack>,
}

impl MediaInfo {
    /// 1920x1080 with no audio tracks.
    pub fn fallback() -> Self {
        Self {
            width: FALLBACK_RESOLUTION.0,
            height: FALLBACK_RESOLUTION.1,
            audio_tracks: Vec::new(),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Diagnostic facts about a finished artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputProbe {
    pub resolution: Option<(u32, u32)>,
    pub duration: Option<f64>,
}

/// Metadata probe for sources and produced artifacts.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, source: &Path) -> MediaResult<MediaInfo>;

    async fn probe_output(&self, artifact: &Path) -> MediaResult<OutputProbe>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }
}

impl FfprobeOutput {
    fn media_info(&self) -> MediaInfo {
        let (width, height) = self
            .streams
            .iter()
            .find(|s| s.is("video"))
            .map(|s| {
                (
                    s.width.unwrap_or(FALLBACK_RESOLUTION.0),
                    s.height.unwrap_or(FALLBACK_RESOLUTION.1),
                )
            })
            .unwrap_or(FALLBACK_RESOLUTION);

        let audio_tracks = self
            .streams
            .iter()
            .filter(|s| s.is("audio"))
            .map(|s| {
                AudioTrack::new(
                    s.index,
                    s.tags.get("language").map(String::as_str),
                    s.codec_name.as_deref(),
                    s.channels,
                )
            })
            .collect();

        MediaInfo {
            width,
            height,
            audio_tracks,
        }
    }

    fn output_probe(&self) -> OutputProbe {
        OutputProbe {
            resolution: self
                .streams
                .iter()
                .find(|s| s.is("video"))
                .and_then(|s| s.width.zip(s.height)),
            duration: self
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok()),
        }
    }
}

/// [`MediaProber`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, path: &Path, extra_args: &[&str]) -> MediaResult<FfprobeOutput> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let binary = crate::command::check_binary(&self.binary)?;

        let output = Command::new(binary)
            .args(["-v", "error", "-print_format", "json"])
            .args(extra_args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::probe_failed(
                format!("ffprobe exited with {}", output.status),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, source: &Path) -> MediaResult<MediaInfo> {
        let probe = self.run(source, &["-show_streams"]).await?;
        Ok(probe.media_info())
    }

    async fn probe_output(&self, artifact: &Path) -> MediaResult<OutputProbe> {
        let probe = self
            .run(
                artifact,
                &["-err_detect", "ignore_err", "-show_format", "-show_streams"],
            )
            .await?;
        Ok(probe.output_probe())
    }
}

/// Process-lifetime memo of source probes.
///
/// A failed probe is cached as [`MediaInfo::fallback`]; lookups never fail.
pub struct ProbeCache {
    prober: Arc<dyn MediaProber>,
    entries: RwLock<HashMap<PathBuf, MediaInfo>>,
}

impl ProbeCache {
    pub fn new(prober: Arc<dyn MediaProber>) -> Self {
        Self {
            prober,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, source: &Path) -> MediaInfo {
        if let Some(info) = self.entries.read().await.get(source) {
            return info.clone();
        }

        let info = match self.prober.probe(source).await {
            Ok(info) => {
                debug!(
                    source = %source.display(),
                    width = info.width,
                    height = info.height,
                    audio_tracks = info.audio_tracks.len(),
                    "Probed source"
                );
                info
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Probe failed, using fallback resolution");
                MediaInfo::fallback()
            }
        };

        self.entries
            .write()
            .await
            .entry(source.to_path_buf())
            .or_insert(info)
            .clone()
    }
}
