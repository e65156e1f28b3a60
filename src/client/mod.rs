//! Per-participant front end.
//!
//! A [`ClientAgent`] prechecks outgoing messages against its cached settings,
//! posts them to the authority without waiting, and turns inbound
//! notifications into [`ClientEvent`]s after applying its local mute list.
//! The precheck only saves round-trips; the authority re-checks everything.

pub mod mute;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::authority::AuthorityHandle;
use crate::clock::{Clock, seconds_between};
use crate::common::{
    ChatMessage, ChatSettings, Channel, ClientEvent, Identity, Inbound, Submission,
};
use crate::error::{ChatError, ValidationError};

use mute::MuteList;

const EVENT_BUFFER: usize = 128;

pub struct ClientAgent {
    identity: Identity,
    display_name: String,
    authority: AuthorityHandle,
    inbox: mpsc::Receiver<Inbound>,
    events: broadcast::Sender<ClientEvent>,
    muted: MuteList,
    settings: ChatSettings,
    last_local_send: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl ClientAgent {
    /// Registers with the authority behind `authority` and caches its settings.
    pub async fn join(
        authority: &AuthorityHandle,
        identity: Identity,
        display_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ChatError> {
        let display_name = display_name.into();
        let (scoped, inbox) = authority.register(identity, display_name.clone()).await?;
        let settings = scoped.settings().await?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        log::debug!("{display_name} ({identity}) joined chat");
        Ok(Self {
            identity,
            display_name,
            authority: scoped,
            inbox,
            events,
            muted: MuteList::new(identity),
            settings,
            last_local_send: None,
            clock,
        })
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Settings as of the last [`refresh_settings`](Self::refresh_settings).
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub async fn refresh_settings(&mut self) -> Result<&ChatSettings, ChatError> {
        self.settings = self.authority.settings().await?;
        Ok(&self.settings)
    }

    /// Every event this agent raises is also published here.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn send_message(
        &mut self,
        content: impl Into<String>,
        channel: Channel,
    ) -> Result<(), ChatError> {
        self.post(Submission::new(content, channel)).await
    }

    pub async fn send_whisper(
        &mut self,
        target: Identity,
        content: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.post(Submission::whisper(target, content)).await
    }

    pub async fn send_proximity(&mut self, content: impl Into<String>) -> Result<(), ChatError> {
        self.post(Submission::new(content, Channel::Proximity)).await
    }

    /// Waits for the next inbound notification that produces an event.
    /// Returns `None` once the authority has dropped this agent's inbox.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        while let Some(inbound) = self.inbox.recv().await {
            if let Some(event) = self.handle_inbound(inbound) {
                return Some(event);
            }
        }
        None
    }

    /// Processes everything already queued without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(inbound) = self.inbox.try_recv() {
            if let Some(event) = self.handle_inbound(inbound) {
                events.push(event);
            }
        }
        events
    }

    /// Mute filter for one delivered message.
    pub fn deliver(&mut self, message: ChatMessage) -> Option<ClientEvent> {
        if message.sender.is_some_and(|sender| self.muted.contains(&sender)) {
            log::trace!(
                "{} dropped message {} from muted {}",
                self.display_name,
                message.id,
                message.sender_name
            );
            return None;
        }
        Some(self.raise(ClientEvent::MessageReceived(message)))
    }

    /// Returns `true` if newly muted. Muting yourself is a no-op.
    pub fn mute(&mut self, identity: Identity) -> bool {
        let changed = self.muted.mute(identity);
        if changed {
            self.raise(ClientEvent::MuteStatusChanged {
                identity,
                muted: true,
            });
        }
        changed
    }

    pub fn unmute(&mut self, identity: &Identity) -> bool {
        let changed = self.muted.unmute(identity);
        if changed {
            self.raise(ClientEvent::MuteStatusChanged {
                identity: *identity,
                muted: false,
            });
        }
        changed
    }

    pub fn is_muted(&self, identity: &Identity) -> bool {
        self.muted.contains(identity)
    }

    pub fn muted(&self) -> Vec<Identity> {
        self.muted.iter().copied().collect()
    }

    pub fn clear_mutes(&mut self) {
        for identity in self.muted.clear() {
            self.raise(ClientEvent::MuteStatusChanged {
                identity,
                muted: false,
            });
        }
    }

    /// Unregisters from the authority.
    pub async fn leave(self) -> Result<bool, ChatError> {
        log::debug!("{} ({}) leaving chat", self.display_name, self.identity);
        self.authority.unregister(self.identity).await
    }

    async fn post(&mut self, submission: Submission) -> Result<(), ChatError> {
        if let Err(err) = self.precheck(&submission.content) {
            log::debug!("{} local precheck failed: {err}", self.display_name);
            self.raise(ClientEvent::MessageFailed {
                reason: err.to_string(),
            });
            return Err(err);
        }

        if let Err(err) = self.authority.submit(submission).await {
            self.raise(ClientEvent::MessageFailed {
                reason: err.to_string(),
            });
            return Err(err);
        }
        Ok(())
    }

    /// Subset of the authority's checks: nonempty, length, local cooldown.
    /// Records the send time when it passes.
    fn precheck(&mut self, content: &str) -> Result<(), ChatError> {
        if content.is_empty() {
            return Err(ValidationError::Empty.into());
        }
        let max = self.settings.max_message_length;
        if content.chars().count() > max {
            return Err(ValidationError::TooLong { max }.into());
        }

        let now = self.clock.now();
        let cooldown = self.settings.message_cooldown_secs;
        if let Some(last) = self.last_local_send {
            let elapsed = seconds_between(last, now);
            if elapsed < cooldown {
                return Err(ChatError::RateLimited {
                    remaining_secs: cooldown - elapsed,
                });
            }
        }
        self.last_local_send = Some(now);
        Ok(())
    }

    fn handle_inbound(&mut self, inbound: Inbound) -> Option<ClientEvent> {
        match inbound {
            Inbound::Deliver(message) => self.deliver(message),
            Inbound::Failed { reason } => {
                log::warn!("{}: chat message failed: {reason}", self.display_name);
                Some(self.raise(ClientEvent::MessageFailed { reason }))
            }
            Inbound::Joined {
                identity,
                display_name,
            } => Some(self.raise(ClientEvent::ParticipantJoined {
                identity,
                display_name,
            })),
            Inbound::Left {
                identity,
                display_name,
            } => Some(self.raise(ClientEvent::ParticipantLeft {
                identity,
                display_name,
            })),
        }
    }

    fn raise(&self, event: ClientEvent) -> ClientEvent {
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }
}
