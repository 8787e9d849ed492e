use base64::Engine;
use gemini_live_types::tools::{ToolCall, ToolCallCancellation};
use gemini_live_types::{Content, ServerMessage};

/// Everything a [`crate::Client`] reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The handshake completed and the setup message has been queued.
    Open,
    /// The connection is gone, whether closed locally or by the server.
    Close { reason: Option<String> },
    Error(String),
    SetupComplete,
    /// The non-audio parts of a model turn fragment.
    Content(Content),
    /// Decoded PCM16 bytes of one inline audio part.
    Audio(Vec<u8>),
    TurnComplete,
    /// The model stopped generating because the user talked over it.
    Interrupted,
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
}

/// Splits one inbound message into the events it carries, in emission order.
///
/// An interrupted server content yields only [`LiveEvent::Interrupted`]. Otherwise audio
/// parts come first, then the remaining parts as a single [`LiveEvent::Content`], then
/// [`LiveEvent::TurnComplete`].
pub fn translate(message: ServerMessage) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::SetupComplete);
    }
    if let Some(call) = message.tool_call {
        events.push(LiveEvent::ToolCall(call));
    }
    if let Some(cancellation) = message.tool_call_cancellation {
        events.push(LiveEvent::ToolCallCancellation(cancellation));
    }

    let Some(content) = message.server_content else {
        return events;
    };

    if content.interrupted {
        events.push(LiveEvent::Interrupted);
        return events;
    }

    if let Some(turn) = content.model_turn {
        let (audio, rest): (Vec<_>, Vec<_>) = turn.parts.into_iter().partition(|p| p.is_audio());

        for blob in audio.into_iter().filter_map(|p| p.inline_data) {
            match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                Ok(bytes) => events.push(LiveEvent::Audio(bytes)),
                Err(e) => tracing::warn!("dropping undecodable audio part: {}", e),
            }
        }

        if !rest.is_empty() {
            events.push(LiveEvent::Content(Content {
                role: turn.role,
                parts: rest,
            }));
        }
    }

    if content.turn_complete {
        events.push(LiveEvent::TurnComplete);
    }

    events
}
