mod consts;

pub use consts::*;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Sample rate the endpoint expects for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the PCM16 audio the endpoint streams back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type prefix shared by every raw PCM payload on the wire.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Microphone access as seen by the capture side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Never requested.
    #[default]
    Unknown,
    Granted,
    /// Terminal until explicitly reset.
    Denied,
}

/// Builds the mime type announcing 16-bit PCM at the given rate, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, sample_rate)
}

/// Extracts the `rate=` parameter from a PCM mime type.
pub fn pcm_rate(mime_type: &str) -> Option<u32> {
    if !mime_type.starts_with(PCM_MIME_PREFIX) {
        return None;
    }
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
