pub mod audio_io;
pub mod config;
pub mod interaction_log;
pub mod orchestrator;
pub mod realtime_api;
pub mod session_state;
pub mod tools;
pub mod transcript;

pub use audio_io::{AudioIo, AudioSignal, NoAudio};
pub use config::{AssistantConfig, ConfigError, ResponseModality, VoiceReconnect};
pub use interaction_log::{
    HttpFallbackSink, InteractionLogEntry, InteractionLogger, InteractionType, LogSink,
    LoggerOptions, NullSink, RestSink,
};
pub use orchestrator::{OrchestratorOptions, SessionOrchestrator, Signal};
pub use realtime_api::LiveApi;
pub use session_state::{ConnectionStatus, Session, SessionSnapshot, UiMode, VoiceState};
pub use tools::{ToolCallDispatcher, ToolHandler, ToolRegistry, UiCommand, builtin_registry};
pub use transcript::{Message, MessageRole, Transcript};
