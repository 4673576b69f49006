//! Inbound message from a channel: delivered to the dispatcher for classification.

/// Kind of transport event. Only `Posted` is ever classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Posted,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        if name == "posted" {
            EventKind::Posted
        } else {
            EventKind::Other(name.to_string())
        }
    }
}

/// One event from the chat transport, reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub text: String,
    pub author_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub event_kind: EventKind,
}
