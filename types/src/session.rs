use crate::audio::Voice;
use crate::content::message::Content;
use crate::tools::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: Voice,
}

impl SpeechConfig {
    pub fn prebuilt(voice: Voice) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
            },
        }
    }

    pub fn voice(&self) -> &Voice {
        &self.voice_config.prebuilt_voice_config.voice_name
    }
}

/// Generation parameters as they appear inside the `setup` message.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Everything negotiated once per connection. Fixed for the lifetime of
/// that connection; a new value only takes effect on the next connect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveConnectConfig {
    /// The set of modalities the model can respond with.
    response_modalities: Vec<Modality>,

    /// Voice preset; only meaningful with audio responses.
    speech_config: Option<SpeechConfig>,

    /// The system instruction prepended to the conversation.
    system_instruction: Option<Content>,

    /// Tools(Functions) available to the model.
    tools: Vec<Tool>,

    /// Sampling temperature for the model.
    temperature: Option<f32>,

    max_output_tokens: Option<u32>,
}

impl LiveConnectConfig {
    pub fn builder() -> LiveConnectConfigBuilder {
        LiveConnectConfigBuilder::new()
    }

    pub fn response_modalities(&self) -> &[Modality] {
        &self.response_modalities
    }

    pub fn speech_config(&self) -> Option<&SpeechConfig> {
        self.speech_config.as_ref()
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn max_output_tokens(&self) -> Option<u32> {
        self.max_output_tokens
    }

    pub fn wants_audio(&self) -> bool {
        self.response_modalities.contains(&Modality::Audio)
    }
}

pub struct LiveConnectConfigBuilder {
    config: LiveConnectConfig,
}

impl Default for LiveConnectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveConnectConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LiveConnectConfig {
                response_modalities: vec![Modality::Text],
                ..Default::default()
            },
        }
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.config.response_modalities = modalities;
        self
    }

    pub fn with_modalities_disable_audio(mut self) -> Self {
        self.config.response_modalities = vec![Modality::Text];
        self.config.speech_config = None;
        self
    }

    pub fn with_modalities_enable_audio(mut self) -> Self {
        self.config.response_modalities = vec![Modality::Audio];
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.config.speech_config = Some(SpeechConfig::prebuilt(voice));
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.config.system_instruction = Some(Content::instruction(instructions));
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.config.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn build(self) -> LiveConnectConfig {
        self.config
    }
}

/// The `setup` message: first frame on every connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,

    pub generation_config: GenerationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl Setup {
    pub fn new(model: &str, config: &LiveConnectConfig) -> Self {
        // speech config is rejected by the endpoint on text-only sessions
        let speech_config = if config.wants_audio() {
            config.speech_config.clone()
        } else {
            None
        };
        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: config.response_modalities.clone(),
                speech_config,
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
            system_instruction: config.system_instruction.clone(),
            tools: config.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_for_audio_session() {
        let config = LiveConnectConfig::builder()
            .with_modalities_enable_audio()
            .with_voice(Voice::Aoede)
            .with_instructions("Be brief.")
            .with_temperature(0.7)
            .build();

        let setup = Setup::new("models/gemini-2.0-flash-exp", &config);
        // through text so the f32 temperature keeps its short form
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&setup).unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "model": "models/gemini-2.0-flash-exp",
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Aoede" } }
                    },
                    "temperature": 0.7
                },
                "systemInstruction": { "parts": [{ "text": "Be brief." }] }
            })
        );
    }

    #[test]
    fn test_setup_drops_voice_for_text_session() {
        let config = LiveConnectConfig::builder()
            .with_voice(Voice::Puck)
            .with_modalities(vec![Modality::Text])
            .build();

        let setup = Setup::new("m", &config);
        assert!(setup.generation_config.speech_config.is_none());
        assert_eq!(setup.generation_config.response_modalities, vec![Modality::Text]);
    }
}
