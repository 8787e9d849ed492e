use crate::audio::{Base64EncodedAudioBytes, PCM_MIME_PREFIX};

/// Inline media payload, also used as the outbound audio chunk.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. "audio/pcm;rate=16000"
    pub mime_type: String,
    pub data: Base64EncodedAudioBytes,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Base64EncodedAudioBytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with(PCM_MIME_PREFIX)
    }
}

/// A single piece of content: text, inline media, or anything else the
/// endpoint sends that we pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,

    /// Set on internal reasoning parts some models emit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn inline(blob: Blob) -> Self {
        Self {
            inline_data: Some(blob),
            ..Default::default()
        }
    }

    /// True for inline PCM audio parts.
    pub fn is_audio(&self) -> bool {
        self.inline_data.as_ref().is_some_and(Blob::is_audio)
    }
}
