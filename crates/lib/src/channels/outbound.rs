//! Outbound side of a channel: where replies are delivered.

use async_trait::async_trait;

/// A reply correlated with the message that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub text: String,
    pub in_reply_to: String,
}

/// Transport failure.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} failed: {status} {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("login response carried no token")]
    MissingToken,
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Best-effort reply delivery. Callers log failures; nothing is retried.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: &OutboundReply) -> Result<(), ChannelError>;
}
