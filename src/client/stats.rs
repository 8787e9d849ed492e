use gemini_live_types::events::UsageMetadata;

/// Token usage accumulated over every connection made by a client.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    prompt_tokens: u64,
    response_tokens: u64,
    total_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update_usage(&mut self, usage: &UsageMetadata) {
        self.prompt_tokens += usage.prompt_token_count;
        self.response_tokens += usage.response_token_count;
        self.total_tokens += usage.total_token_count;
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}
