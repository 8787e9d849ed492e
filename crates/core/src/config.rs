use std::str::FromStr;

use gemini_live_types::LiveConnectConfig;
use gemini_live_types::audio::Voice;
use gemini_live_types::session::Modality;
use gemini_live_types::tools::Tool;

use crate::session_state::UiMode;

pub const MAX_INSTRUCTIONS_CHARS: usize = 4000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful fitness assistant. Help users with workout plans, \
nutrition and supplement questions, and generate reports when asked. Keep responses concise and practical.";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("system instructions are {0} characters long, the limit is {MAX_INSTRUCTIONS_CHARS}")]
    InstructionsTooLong(usize),

    #[error("temperature must be between 0.0 and 2.0, got {0}")]
    InvalidTemperature(f32),

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Modalities requested for voice-mode replies. Text mode always asks for text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
    #[default]
    TextAndAudio,
}

impl FromStr for ResponseModality {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "AUDIO" => Ok(Self::Audio),
            "TEXT_AND_AUDIO" => Ok(Self::TextAndAudio),
            _ => Err(ConfigError::InvalidValue {
                name: "response modality",
                value: s.to_string(),
            }),
        }
    }
}

/// When a switch into voice mode reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VoiceReconnect {
    /// Wait until capture starts so an idle session holds no connection.
    #[default]
    Lazy,
    /// Reconnect right away, like text mode does.
    Eager,
}

impl FromStr for VoiceReconnect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            _ => Err(ConfigError::InvalidValue {
                name: "voice reconnect policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Settings staged by the user. They are read at connect time only, so a change
/// never touches a connection that is already open.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    voice: Voice,
    instructions: String,
    tools_enabled: bool,
    response_modality: ResponseModality,
    temperature: f32,
    max_output_tokens: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            tools_enabled: true,
            response_modality: ResponseModality::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl AssistantConfig {
    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled
    }

    pub fn response_modality(&self) -> ResponseModality {
        self.response_modality
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn set_voice(&mut self, voice: Voice) {
        self.voice = voice;
    }

    pub fn set_instructions(&mut self, instructions: &str) -> Result<(), ConfigError> {
        let len = instructions.chars().count();
        if len > MAX_INSTRUCTIONS_CHARS {
            return Err(ConfigError::InstructionsTooLong(len));
        }
        self.instructions = instructions.to_string();
        Ok(())
    }

    pub fn set_tools_enabled(&mut self, enabled: bool) {
        self.tools_enabled = enabled;
    }

    pub fn set_response_modality(&mut self, modality: ResponseModality) {
        self.response_modality = modality;
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn set_max_output_tokens(&mut self, max_output_tokens: u32) {
        self.max_output_tokens = max_output_tokens.max(1);
    }

    /// The negotiated parameters for a connection made in `mode`.
    pub fn live_config(&self, mode: UiMode, tools: Vec<Tool>) -> LiveConnectConfig {
        let mut builder = LiveConnectConfig::builder()
            .with_instructions(&self.instructions)
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.max_output_tokens);

        if self.tools_enabled && !tools.is_empty() {
            builder = builder.with_tools(tools);
        }

        let speaks = mode == UiMode::Voice && self.response_modality != ResponseModality::Text;
        if speaks {
            // the endpoint accepts a single response modality per connection
            builder
                .with_modalities(vec![Modality::Audio])
                .with_voice(self.voice.clone())
                .build()
        } else {
            builder.with_modalities_disable_audio().build()
        }
    }
}
