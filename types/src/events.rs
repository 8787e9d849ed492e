mod server;

pub use server::*;

use crate::content::message::Content;
use crate::content::parts::{Blob, Part};
use crate::session::Setup;
use crate::tools::ToolResponse;

/// Messages sent by the client. Serialized externally tagged, so a setup
/// message goes out as `{"setup": {...}}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContent {
    /// A single user turn made of `parts`.
    pub fn user(parts: Vec<Part>, turn_complete: bool) -> Self {
        Self {
            turns: vec![Content::user(parts)],
            turn_complete,
        }
    }
}

/// Streamed media outside the turn structure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}
