//! Encoder command construction.

use std::path::{Path, PathBuf};

use jclip_models::{ClipSpec, OutputFormat};

use crate::error::{MediaError, MediaResult};

/// A fully resolved encoder process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderInvocation {
    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Turns a clip spec into the encoder invocation that produces `output`.
pub trait EncodeCommandBuilder: Send + Sync {
    fn build(&self, spec: &ClipSpec, output: &Path) -> EncoderInvocation;

    /// Low-resolution mp4 of the same window, whatever the output format.
    fn build_preview(&self, spec: &ClipSpec, output: &Path) -> EncoderInvocation;

    /// Binary the invocations run, used for readiness checks.
    fn program(&self) -> &Path;
}

/// Builder for FFmpeg argument lists.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments before -i
    input_args: Vec<String>,
    /// Arguments after -i
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    /// Add an argument before -i.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an argument after -i.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple arguments after -i.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep decoding through corrupt packets and probe deep into the input.
    pub fn tolerant_input(self) -> Self {
        self.input_arg("-err_detect")
            .input_arg("ignore_err")
            .input_arg("-probesize")
            .input_arg("100000000")
            .input_arg("-analyzeduration")
            .input_arg("100000000")
    }

    /// Input seek, placed before -i.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Add a stream map (prefix with `-` to exclude).
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Stereo audio at the given bitrate.
    pub fn stereo_audio(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a")
            .output_arg(bitrate)
            .output_arg("-ac")
            .output_arg("2")
    }

    pub fn threads(self, threads: u32) -> Self {
        self.output_arg("-threads").output_arg(threads.to_string())
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string()];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Width of previews; height keeps the aspect ratio at an even value.
pub const PREVIEW_WIDTH: u32 = 1280;

/// FFmpeg implementation of [`EncodeCommandBuilder`].
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    binary: PathBuf,
    threads: u32,
}

impl FfmpegCommandBuilder {
    pub fn new(binary: impl Into<PathBuf>, threads: u32) -> Self {
        Self {
            binary: binary.into(),
            threads: threads.max(1),
        }
    }

    fn command(&self, spec: &ClipSpec, output: &Path) -> FfmpegCommand {
        let (width, height) = spec.output_resolution;
        let audio_map = format!("0:a:{}?", spec.audio_index);

        let cmd = FfmpegCommand::new(&spec.source_path, output)
            .tolerant_input()
            .seek(spec.window.seek_secs)
            .duration(spec.window.duration_secs);

        match spec.format {
            OutputFormat::Mp3 => cmd
                .map(audio_map)
                .map("-0:s?")
                .audio_codec("libmp3lame")
                .stereo_audio("192k")
                .threads(self.threads),
            OutputFormat::Gif => cmd
                .map("0:v:0?")
                .video_filter(format!(
                    "fps=10,scale={}:{}:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
                    width, height
                ))
                .output_args(["-an", "-loop", "0"])
                .threads(self.threads),
            OutputFormat::Mp4 | OutputFormat::Mkv | OutputFormat::Avi => {
                let (video_codec, audio_codec) = match spec.format {
                    OutputFormat::Avi => ("mpeg4", "libmp3lame"),
                    _ => ("libx264", "aac"),
                };

                let mut cmd = cmd
                    .map("0:v:0?")
                    .map(audio_map)
                    .map("-0:s?")
                    .video_codec(video_codec)
                    .preset("veryfast")
                    .audio_codec(audio_codec)
                    .stereo_audio("192k")
                    .threads(self.threads)
                    .output_args(["-r", "23.98", "-pix_fmt", "yuv420p"]);

                if spec.needs_scaling() {
                    cmd = cmd.video_filter(format!("scale={}:{}:flags=lanczos", width, height));
                }
                if spec.format == OutputFormat::Mp4 {
                    cmd = cmd.output_args(["-movflags", "+faststart"]);
                }
                cmd
            }
        }
    }
}

impl EncodeCommandBuilder for FfmpegCommandBuilder {
    fn build(&self, spec: &ClipSpec, output: &Path) -> EncoderInvocation {
        EncoderInvocation {
            program: self.binary.clone(),
            args: self.command(spec, output).build_args(),
        }
    }

    fn build_preview(&self, spec: &ClipSpec, output: &Path) -> EncoderInvocation {
        let cmd = FfmpegCommand::new(&spec.source_path, output)
            .tolerant_input()
            .seek(spec.window.seek_secs)
            .duration(spec.window.duration_secs)
            .map("0:v:0?")
            .map(format!("0:a:{}?", spec.audio_index))
            .map("-0:s?")
            .video_codec("libx264")
            .preset("veryfast")
            .output_args(["-crf", "28"])
            .audio_codec("aac")
            .stereo_audio("128k")
            .video_filter(format!("scale={}:-2:flags=lanczos", PREVIEW_WIDTH))
            .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .threads(self.threads)
            .output_args(["-r", "23.98"]);

        EncoderInvocation {
            program: self.binary.clone(),
            args: cmd.build_args(),
        }
    }

    fn program(&self) -> &Path {
        &self.binary
    }
}

/// Resolve a binary on `PATH` (or accept an existing absolute path).
pub fn check_binary(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::BinaryNotFound(binary.to_string_lossy().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jclip_models::ClipWindow;

    fn spec(format: OutputFormat, scale_factor: f64) -> ClipSpec {
        ClipSpec {
            source_path: PathBuf::from("/movies/Film/film.mkv"),
            window: ClipWindow::compute(Some("00:00:10,000"), Some("00:00:15,000"), 2.0, 10.0),
            format,
            scale_factor,
            audio_index: 1,
            source_resolution: (1920, 1080),
            output_resolution: jclip_models::scaled_dimensions(1920, 1080, scale_factor),
        }
    }

    fn args_for(format: OutputFormat, scale_factor: f64) -> Vec<String> {
        FfmpegCommandBuilder::new("ffmpeg", 4)
            .build(&spec(format, scale_factor), Path::new("/output/out.bin"))
            .args
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_seek_precedes_input() {
        let args = args_for(OutputFormat::Mp4, 1.0);
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek < input);
        assert!(has_pair(&args, "-ss", "8.000"));
        assert!(has_pair(&args, "-t", "9.000"));
        assert!(has_pair(&args, "-err_detect", "ignore_err"));
        assert_eq!(args.last().unwrap(), "/output/out.bin");
    }

    #[test]
    fn test_mp4_codecs_and_maps() {
        let args = args_for(OutputFormat::Mp4, 1.0);
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-c:a", "aac"));
        assert!(has_pair(&args, "-map", "0:v:0?"));
        assert!(has_pair(&args, "-map", "0:a:1?"));
        assert!(has_pair(&args, "-map", "-0:s?"));
        assert!(has_pair(&args, "-movflags", "+faststart"));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_scale_filter_only_when_scaling() {
        let args = args_for(OutputFormat::Mkv, 0.5);
        assert!(has_pair(&args, "-vf", "scale=960:540:flags=lanczos"));
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_avi_and_mp3() {
        let avi = args_for(OutputFormat::Avi, 1.0);
        assert!(has_pair(&avi, "-c:v", "mpeg4"));
        assert!(has_pair(&avi, "-c:a", "libmp3lame"));

        let mp3 = args_for(OutputFormat::Mp3, 0.5);
        assert!(has_pair(&mp3, "-c:a", "libmp3lame"));
        assert!(has_pair(&mp3, "-b:a", "192k"));
        assert!(!mp3.contains(&"-c:v".to_string()));
        assert!(!mp3.contains(&"0:v:0?".to_string()));
    }

    #[test]
    fn test_preview_is_small_mp4_for_any_format() {
        let args = FfmpegCommandBuilder::new("ffmpeg", 2)
            .build_preview(&spec(OutputFormat::Gif, 0.5), Path::new("/tmp/job/preview.mp4"))
            .args;
        assert!(has_pair(&args, "-ss", "8.000"));
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-crf", "28"));
        assert!(has_pair(&args, "-b:a", "128k"));
        assert!(has_pair(&args, "-vf", "scale=1280:-2:flags=lanczos"));
        assert!(has_pair(&args, "-map", "0:a:1?"));
        assert!(!args.contains(&"palettegen".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/job/preview.mp4");
    }

    #[test]
    fn test_gif_has_palette_and_no_audio() {
        let args = args_for(OutputFormat::Gif, 1.0);
        let filter = args.iter().skip_while(|a| *a != "-vf").nth(1).unwrap();
        assert!(filter.contains("palettegen"));
        assert!(args.contains(&"-an".to_string()));
    }
}
