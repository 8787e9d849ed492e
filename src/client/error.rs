use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("connection attempt was cancelled by a later disconnect or connect")]
    Cancelled,

    #[error("invalid connection request: {0}")]
    Request(#[source] tungstenite::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}
