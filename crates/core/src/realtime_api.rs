use anyhow::Result;
use async_trait::async_trait;
use gemini_live::types::tools::ToolResponse;
use gemini_live::types::{Blob, LiveConnectConfig, Part};
use gemini_live::{ConnectionStatus, EventRx};

/// The duplex session as seen by the orchestrator and the tool dispatcher.
///
/// Implemented by [`gemini_live::Client`]; tests substitute an in-memory fake.
#[async_trait]
pub trait LiveApi: Send + Sync {
    async fn connect(&self, model: &str, config: &LiveConnectConfig) -> Result<()>;

    /// Returns false when there was no connection to close.
    async fn disconnect(&self) -> bool;

    /// Each send returns false (and does nothing) while disconnected.
    async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> bool;

    async fn send_realtime_input(&self, chunks: Vec<Blob>) -> bool;

    async fn send_tool_response(&self, response: ToolResponse) -> bool;

    fn status(&self) -> ConnectionStatus;

    fn subscribe(&self) -> EventRx;

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }
}

#[async_trait]
impl LiveApi for gemini_live::Client {
    async fn connect(&self, model: &str, config: &LiveConnectConfig) -> Result<()> {
        gemini_live::Client::connect(self, model, config).await?;
        Ok(())
    }

    async fn disconnect(&self) -> bool {
        gemini_live::Client::disconnect(self).await
    }

    async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> bool {
        gemini_live::Client::send(self, parts, turn_complete).await
    }

    async fn send_realtime_input(&self, chunks: Vec<Blob>) -> bool {
        gemini_live::Client::send_realtime_input(self, chunks).await
    }

    async fn send_tool_response(&self, response: ToolResponse) -> bool {
        gemini_live::Client::send_tool_response(self, response).await
    }

    fn status(&self) -> ConnectionStatus {
        gemini_live::Client::status(self)
    }

    fn subscribe(&self) -> EventRx {
        gemini_live::Client::subscribe(self)
    }
}
