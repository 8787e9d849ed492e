use gemini_live_types::audio::PermissionState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Voice,
    Text,
}

impl std::str::FromStr for UiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voice" => Ok(UiMode::Voice),
            "text" => Ok(UiMode::Text),
            other => Err(format!("unknown mode {:?}, expected voice or text", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Speaking,
    Paused,
}

/// The one live session of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub connection_status: ConnectionStatus,
    pub ui_mode: UiMode,
    pub voice_state: VoiceState,
}

impl Session {
    pub fn new(ui_mode: UiMode) -> Self {
        Self {
            session_id: format!("session_{}", uuid::Uuid::new_v4().simple()),
            connection_status: ConnectionStatus::Disconnected,
            ui_mode,
            voice_state: VoiceState::Idle,
        }
    }
}

/// What a front end renders. Published after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub is_recording: bool,
    pub is_playing: bool,
    pub audio_level: u8,
    pub microphone_permission: PermissionState,
    /// An assistant reply is being streamed.
    pub is_streaming: bool,
    /// Text received so far for the in-flight reply.
    pub current_response: String,
    pub is_sidebar_open: bool,
    pub is_transitioning: bool,
    pub last_error: Option<String>,
    pub message_count: usize,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.session.connection_status == ConnectionStatus::Connected
    }

    /// Send/record stay disabled while the session is down or the microphone is refused.
    pub fn can_record(&self) -> bool {
        self.microphone_permission != PermissionState::Denied && !self.is_transitioning
    }
}
