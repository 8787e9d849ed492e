use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioContent {
    pub size_bytes: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    fn new(role: MessageRole, content: MessageContent, metadata: Option<MessageMetadata>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.text.as_deref()
    }
}

/// Insertion-ordered conversation plus the reply currently being streamed.
///
/// Finalized messages are never modified; only the in-flight reply grows.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    streaming: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, text: &str) -> &Message {
        let content = MessageContent {
            text: Some(text.to_string()),
            audio: None,
        };
        self.messages.push(Message::new(MessageRole::User, content, None));
        &self.messages[self.messages.len() - 1]
    }

    /// Marks a reply as in flight without any text yet.
    pub fn begin_streaming(&mut self) {
        self.streaming.get_or_insert_with(String::new);
    }

    pub fn append_delta(&mut self, delta: &str) {
        self.streaming.get_or_insert_with(String::new).push_str(delta);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn current_response(&self) -> &str {
        self.streaming.as_deref().unwrap_or_default()
    }

    /// Closes the in-flight reply. Produces a message only when it carried text or audio.
    pub fn finalize(
        &mut self,
        audio: Option<AudioContent>,
        metadata: Option<MessageMetadata>,
    ) -> Option<&Message> {
        let text = self.streaming.take().filter(|t| !t.trim().is_empty());
        if text.is_none() && audio.is_none() {
            return None;
        }
        let content = MessageContent { text, audio };
        self.messages
            .push(Message::new(MessageRole::Assistant, content, metadata));
        self.messages.last()
    }

    /// Drops the in-flight reply, returning what had been received.
    pub fn discard(&mut self) -> Option<String> {
        self.streaming.take()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamed_reply_becomes_one_message() {
        let mut transcript = Transcript::new();
        transcript.push_user("Hello");
        transcript.begin_streaming();
        transcript.append_delta("Hi ");
        transcript.append_delta("there");

        assert!(transcript.is_streaming());
        assert_eq!(transcript.current_response(), "Hi there");

        let message = transcript.finalize(None, None).cloned().unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.text(), Some("Hi there"));
        assert!(!transcript.is_streaming());
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].text(), Some("Hello"));
    }

    #[test]
    fn test_discarded_reply_is_never_persisted() {
        let mut transcript = Transcript::new();
        transcript.append_delta("partial");

        assert_eq!(transcript.discard().as_deref(), Some("partial"));
        assert!(transcript.finalize(None, None).is_none());
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_audio_only_reply() {
        let mut transcript = Transcript::new();
        let audio = AudioContent {
            size_bytes: 4800,
            duration_ms: 100,
        };
        let message = transcript.finalize(Some(audio), None).cloned().unwrap();
        assert_eq!(message.text(), None);
        assert_eq!(message.content.audio, Some(audio));
    }
}
