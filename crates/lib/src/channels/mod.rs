//! Chat channel plumbing.
//!
//! Inbound events arrive as `InboundMessage`s on an mpsc channel; replies leave through a
//! `ReplySink`. Mattermost is the only transport.

mod inbound;
mod mattermost;
mod outbound;

pub use inbound::{EventKind, InboundMessage};
pub use mattermost::{parse_event, MattermostChannel, MattermostUser};
pub use outbound::{ChannelError, OutboundReply, ReplySink};
