use super::types::{ChatMessage, Identity};

/// Notification sent from the authority down to one client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Deliver(ChatMessage),
    /// A submission from this client was rejected.
    Failed { reason: String },
    Joined {
        identity: Identity,
        display_name: String,
    },
    Left {
        identity: Identity,
        display_name: String,
    },
}

/// Event raised by a client agent for its presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    MessageReceived(ChatMessage),
    MessageFailed { reason: String },
    ParticipantJoined {
        identity: Identity,
        display_name: String,
    },
    ParticipantLeft {
        identity: Identity,
        display_name: String,
    },
    MuteStatusChanged { identity: Identity, muted: bool },
}
