//! Audio track metadata and default-track selection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One audio stream of a source file, as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Absolute stream index within the container
    pub index: u32,
    /// Capitalised language tag, `Unknown` when untagged
    pub language: String,
    /// Upper-cased codec name
    pub codec: String,
    pub channels: Option<u32>,
}

impl AudioTrack {
    pub fn new(index: u32, language: Option<&str>, codec: Option<&str>, channels: Option<u32>) -> Self {
        Self {
            index,
            language: capitalize(language.unwrap_or("unknown")),
            codec: codec.unwrap_or("unknown").to_uppercase(),
            channels,
        }
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// ISO-639-2 code for a two-letter language setting. Unknown settings map to `eng`.
pub fn language_code(language: &str) -> &'static str {
    match language.trim().to_lowercase().as_str() {
        "fr" => "fre",
        "es" => "spa",
        "de" => "ger",
        "it" => "ita",
        "pt" => "por",
        "ru" => "rus",
        "zh" => "chi",
        "ja" => "jpn",
        "ko" => "kor",
        _ => "eng",
    }
}

/// Relative index of the first track in `language`, or 0.
pub fn default_audio_index(tracks: &[AudioTrack], language: &str) -> u32 {
    let wanted = language_code(language);
    tracks
        .iter()
        .position(|t| t.language.eq_ignore_ascii_case(wanted))
        .map(|i| i as u32)
        .unwrap_or(0)
}
