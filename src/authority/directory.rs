use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::common::{Identity, Inbound};

/// Delivery side of one client's inbox.
#[derive(Debug, Clone)]
pub struct Endpoint {
    sender: mpsc::Sender<Inbound>,
}

/// Result of pushing one notification at an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The inbox is full; this notification was dropped.
    Dropped,
    /// The client side went away.
    Closed,
}

impl Endpoint {
    pub fn new(sender: mpsc::Sender<Inbound>) -> Self {
        Self { sender }
    }

    /// Never blocks the authority: a slow client loses the notification
    /// instead of stalling everyone else.
    pub fn push(&self, inbound: Inbound) -> DeliveryStatus {
        match self.sender.try_send(inbound) {
            Ok(()) => DeliveryStatus::Delivered,
            Err(TrySendError::Full(_)) => DeliveryStatus::Dropped,
            Err(TrySendError::Closed(_)) => DeliveryStatus::Closed,
        }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: Identity,
    pub display_name: String,
    pub endpoint: Endpoint,
}

/// Connected participants keyed by identity.
#[derive(Debug, Default)]
pub struct RecipientDirectory {
    entries: BTreeMap<Identity, Participant>,
}

impl RecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the identity was already present; the existing
    /// entry is left untouched.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if self.entries.contains_key(&participant.identity) {
            return false;
        }
        self.entries.insert(participant.identity, participant);
        true
    }

    pub fn remove(&mut self, identity: &Identity) -> Option<Participant> {
        self.entries.remove(identity)
    }

    pub fn get(&self, identity: &Identity) -> Option<&Participant> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    /// All identities in ascending order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.keys()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
