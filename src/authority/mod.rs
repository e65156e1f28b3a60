//! Authority side of the chat: validation, rate limiting, history and routing.
//!
//! [`ChatAuthority`] is the synchronous core. It is owned by a single
//! [`AuthorityService`] task, which is what serializes every mutating call;
//! everyone else talks to it through an [`AuthorityHandle`].

pub mod directory;
pub mod dispatch;
pub mod history;
pub mod presence;
pub mod rate_limiter;
pub mod router;
pub mod service;

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::common::{ChatMessage, ChatSettings, Channel, Color, Identity, Position, Submission};
use crate::error::{ChatError, ValidationError};

use directory::{Participant, RecipientDirectory};
use history::HistoryBuffer;
use presence::PresenceTable;
use rate_limiter::RateLimiter;
use router::{RouteContext, TeamMembership, TeamRouting};

pub use dispatch::{Caller, OperationKind, Role};
pub use service::{AuthorityHandle, AuthorityService, ServiceOptions};

/// Upper bound on content length regardless of configured settings, checked
/// before anything more expensive.
pub const HARD_CONTENT_CAP: usize = 1024;

pub const SYSTEM_SENDER_NAME: &str = "System";

/// Where a submission is in the pipeline. Nothing is persisted between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    RateLimiting,
    Committing,
    Delivered,
    Rejected,
}

/// A message that made it into history, plus who should get a copy.
#[derive(Debug, Clone)]
pub struct Committed {
    pub message: ChatMessage,
    pub recipients: Vec<Identity>,
}

#[derive(Debug)]
pub struct ChatAuthority {
    settings: ChatSettings,
    directory: RecipientDirectory,
    rate_limiter: RateLimiter,
    history: HistoryBuffer,
    presence: PresenceTable,
    teams: TeamRouting,
    clock: Arc<dyn Clock>,
}

impl ChatAuthority {
    pub fn new(settings: ChatSettings, clock: Arc<dyn Clock>) -> Result<Self, ChatError> {
        settings.validate()?;
        Ok(Self {
            history: HistoryBuffer::new(settings.max_history_size),
            settings,
            directory: RecipientDirectory::new(),
            rate_limiter: RateLimiter::new(),
            presence: PresenceTable::new(),
            teams: TeamRouting::Degraded,
            clock,
        })
    }

    pub fn with_team_partition(mut self, teams: Arc<dyn TeamMembership>) -> Self {
        self.teams = TeamRouting::Partitioned(teams);
        self
    }

    /// Runs a submission through validation and rate limiting and, if it
    /// passes, commits it to history. `sender` is the identity bound to the
    /// calling handle, never something taken from the payload.
    pub fn submit(
        &mut self,
        sender: Option<&Identity>,
        submission: Submission,
    ) -> Result<Committed, ChatError> {
        trace_stage(sender, Stage::Received);

        trace_stage(sender, Stage::Validating);
        if let Err(err) = self.validate(sender, &submission) {
            log::debug!("Rejected submission from {sender:?}: {err}");
            trace_stage(sender, Stage::Rejected);
            return Err(err.into());
        }

        // One reading serves both the cooldown record and the timestamp.
        let now = self.clock.now();
        trace_stage(sender, Stage::RateLimiting);
        if let Some(sender) = sender {
            if let Err(err) = self.rate_limiter.check_and_record(
                sender,
                now,
                self.settings.message_cooldown_secs,
            ) {
                log::debug!("Rate limited {sender}: {err}");
                trace_stage(Some(sender), Stage::Rejected);
                return Err(err);
            }
        }

        trace_stage(sender, Stage::Committing);
        // Validation guarantees a present sender is in the directory.
        let sender_name = sender
            .and_then(|id| self.directory.get(id))
            .map_or_else(
                || SYSTEM_SENDER_NAME.to_string(),
                |participant| participant.display_name.clone(),
            );
        let whisper_target = match submission.channel {
            Channel::Whisper => submission.whisper_target,
            _ => None,
        };
        let color = submission.channel.default_color().unwrap_or_default();
        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender: sender.copied(),
            sender_name,
            content: submission.content,
            channel: submission.channel,
            timestamp: now,
            color,
            whisper_target,
        };

        let committed = self.commit(message);
        trace_stage(sender, Stage::Delivered);
        Ok(committed)
    }

    /// System broadcast: no sender, no checks, reaches every participant.
    pub fn broadcast_system(&mut self, content: impl Into<String>, color: Color) -> Committed {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender: None,
            sender_name: SYSTEM_SENDER_NAME.to_string(),
            content: content.into(),
            channel: Channel::System,
            timestamp: self.clock.now(),
            color,
            whisper_target: None,
        };
        self.commit(message)
    }

    pub fn recent_messages(&self, count: usize) -> Vec<ChatMessage> {
        self.history.recent(count)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        log::info!("Chat history cleared");
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ChatSettings) -> Result<(), ChatError> {
        settings.validate()?;
        self.history.set_capacity(settings.max_history_size);
        self.settings = settings;
        log::info!("Chat settings updated: {:?}", self.settings);
        Ok(())
    }

    /// Returns `false` when the identity is already registered.
    pub fn register(&mut self, participant: Participant) -> bool {
        let identity = participant.identity;
        let added = self.directory.insert(participant);
        if added {
            log::info!(
                "Participant {identity} registered. Total: {}",
                self.directory.len()
            );
        }
        added
    }

    /// Removes the participant together with its cooldown and presence state.
    pub fn unregister(&mut self, identity: &Identity) -> Option<Participant> {
        self.rate_limiter.remove(identity);
        self.presence.remove(identity);
        let removed = self.directory.remove(identity);
        if removed.is_some() {
            log::info!(
                "Participant {identity} unregistered. Total: {}",
                self.directory.len()
            );
        }
        removed
    }

    pub fn update_position(&mut self, identity: Identity, position: Option<Position>) {
        self.presence.set_position(identity, position);
    }

    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn validate(
        &self,
        sender: Option<&Identity>,
        submission: &Submission,
    ) -> Result<(), ValidationError> {
        let content = &submission.content;
        if content.is_empty() && !self.settings.allow_empty_messages {
            return Err(ValidationError::Empty);
        }

        let length = content.chars().count();
        if length > HARD_CONTENT_CAP {
            return Err(ValidationError::TooLong {
                max: HARD_CONTENT_CAP,
            });
        }
        if length > self.settings.max_message_length {
            return Err(ValidationError::TooLong {
                max: self.settings.max_message_length,
            });
        }

        match sender {
            None if submission.channel != Channel::System => {
                return Err(ValidationError::MissingSender);
            }
            // A handle can outlive its registration; nothing is kept for it.
            Some(sender) if !self.directory.contains(sender) => {
                return Err(ValidationError::MissingSender);
            }
            _ => {}
        }
        if submission.channel == Channel::Whisper && submission.whisper_target.is_none() {
            return Err(ValidationError::MissingWhisperTarget);
        }
        Ok(())
    }

    fn commit(&mut self, message: ChatMessage) -> Committed {
        self.history.push(message.clone());
        let recipients = router::resolve(
            &message,
            RouteContext {
                directory: &self.directory,
                presence: &self.presence,
                proximity_radius: self.settings.proximity_radius,
                teams: &self.teams,
            },
        );
        log::debug!(
            "Committed {} message {} from {} to {} recipient(s)",
            message.channel,
            message.id,
            message.sender_name,
            recipients.len()
        );
        Committed {
            message,
            recipients,
        }
    }
}

fn trace_stage(sender: Option<&Identity>, stage: Stage) {
    match sender {
        Some(sender) => log::trace!("Submission from {sender}: {stage:?}"),
        None => log::trace!("Submission from authority: {stage:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::common::Inbound;
    use directory::Endpoint;

    struct Fixture {
        clock: Arc<ManualClock>,
        authority: ChatAuthority,
        inboxes: Vec<mpsc::Receiver<Inbound>>,
    }

    impl Fixture {
        fn new(settings: ChatSettings) -> Self {
            let clock = Arc::new(ManualClock::at_epoch());
            let authority = ChatAuthority::new(settings, clock.clone()).unwrap();
            Self {
                clock,
                authority,
                inboxes: Vec::new(),
            }
        }

        fn join(&mut self, name: &str) -> Identity {
            let (tx, rx) = mpsc::channel(8);
            let identity = Identity::new();
            self.authority.register(Participant {
                identity,
                display_name: name.to_string(),
                endpoint: Endpoint::new(tx),
            });
            self.inboxes.push(rx);
            identity
        }
    }

    fn no_cooldown() -> ChatSettings {
        ChatSettings {
            message_cooldown_secs: 0.0,
            ..ChatSettings::default()
        }
    }

    #[test]
    fn validation_order_first_failure_wins() {
        let mut fx = Fixture::new(ChatSettings {
            max_message_length: 10,
            ..no_cooldown()
        });

        // Empty beats missing sender.
        let err = fx
            .authority
            .submit(None, Submission::new("", Channel::Global))
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::Empty));

        // Length beats missing sender.
        let err = fx
            .authority
            .submit(None, Submission::new("x".repeat(11), Channel::Global))
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::TooLong { max: 10 }));
        assert_eq!(err.to_string(), "message too long (max 10)");

        let err = fx
            .authority
            .submit(None, Submission::new("hi", Channel::Global))
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::MissingSender));
    }

    #[test]
    fn hard_cap_applies_before_configured_length() {
        let mut fx = Fixture::new(ChatSettings {
            max_message_length: 5000,
            ..no_cooldown()
        });
        let alice = fx.join("alice");
        let err = fx
            .authority
            .submit(Some(&alice), Submission::new("x".repeat(1025), Channel::Global))
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::TooLong { max: 1024 }));

        assert!(
            fx.authority
                .submit(Some(&alice), Submission::new("x".repeat(1024), Channel::Global))
                .is_ok()
        );
    }

    #[test]
    fn whisper_without_target_is_always_rejected() {
        let mut fx = Fixture::new(no_cooldown());
        let alice = fx.join("alice");
        for content in ["hi", "a longer whisper", "?"] {
            let err = fx
                .authority
                .submit(Some(&alice), Submission::new(content, Channel::Whisper))
                .unwrap_err();
            assert_eq!(err, ChatError::Validation(ValidationError::MissingWhisperTarget));
        }
        assert!(fx.authority.recent_messages(0).is_empty());
    }

    #[test]
    fn empty_messages_allowed_when_configured() {
        let mut fx = Fixture::new(ChatSettings {
            allow_empty_messages: true,
            ..no_cooldown()
        });
        let alice = fx.join("alice");
        assert!(
            fx.authority
                .submit(Some(&alice), Submission::new("", Channel::Global))
                .is_ok()
        );
    }

    #[test]
    fn cooldown_scenario() {
        let mut fx = Fixture::new(ChatSettings::default());
        let alice = fx.join("alice");
        let say = |text: &str| Submission::new(text, Channel::Global);

        assert!(fx.authority.submit(Some(&alice), say("t=0")).is_ok());

        fx.clock.advance(Duration::from_millis(300));
        match fx.authority.submit(Some(&alice), say("t=0.3")) {
            Err(ChatError::RateLimited { remaining_secs }) => {
                assert!((remaining_secs - 0.2).abs() < 1e-6)
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        fx.clock.advance(Duration::from_millis(300));
        assert!(fx.authority.submit(Some(&alice), say("t=0.6")).is_ok());

        let history = fx.authority.recent_messages(0);
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["t=0", "t=0.6"]);
    }

    #[test]
    fn spacing_at_or_beyond_cooldown_is_accepted() {
        let mut fx = Fixture::new(ChatSettings {
            message_cooldown_secs: 2.0,
            ..ChatSettings::default()
        });
        let alice = fx.join("alice");
        for _ in 0..3 {
            assert!(
                fx.authority
                    .submit(Some(&alice), Submission::new("tick", Channel::Global))
                    .is_ok()
            );
            fx.clock.advance(Duration::from_secs(2));
        }
    }

    #[test]
    fn history_keeps_last_max_in_order() {
        let mut fx = Fixture::new(ChatSettings {
            max_history_size: 5,
            ..no_cooldown()
        });
        let alice = fx.join("alice");
        for n in 0..12 {
            fx.authority
                .submit(Some(&alice), Submission::new(n.to_string(), Channel::Global))
                .unwrap();
        }
        let contents: Vec<_> = fx
            .authority
            .recent_messages(0)
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["7", "8", "9", "10", "11"]);
        assert_eq!(fx.authority.recent_messages(2).len(), 2);
    }

    #[test]
    fn committed_message_is_stamped_and_named() {
        let mut fx = Fixture::new(no_cooldown());
        let alice = fx.join("alice");
        let bob = fx.join("bob");
        fx.clock.advance(Duration::from_secs(3661));

        let committed = fx
            .authority
            .submit(Some(&alice), Submission::whisper(bob, "psst"))
            .unwrap();
        assert_eq!(committed.message.sender, Some(alice));
        assert_eq!(committed.message.sender_name, "alice");
        assert_eq!(committed.message.whisper_target, Some(bob));
        assert_eq!(committed.message.formatted_timestamp(), "01:01:01");

        // A target on a non-whisper channel is dropped.
        let mut stray = Submission::new("hello", Channel::Global);
        stray.whisper_target = Some(bob);
        let committed = fx.authority.submit(Some(&alice), stray).unwrap();
        assert_eq!(committed.message.whisper_target, None);
        assert_eq!(committed.recipients.len(), 2);
    }

    #[test]
    fn system_broadcast_skips_checks() {
        let mut fx = Fixture::new(ChatSettings {
            max_message_length: 3,
            ..ChatSettings::default()
        });
        fx.join("alice");
        fx.join("bob");

        let committed = fx.authority.broadcast_system("server restarting", Color::YELLOW);
        assert_eq!(committed.message.sender, None);
        assert_eq!(committed.message.sender_name, SYSTEM_SENDER_NAME);
        assert_eq!(committed.message.channel, Channel::System);
        assert_eq!(committed.recipients.len(), 2);
        assert_eq!(fx.authority.recent_messages(0).len(), 1);
    }

    #[test]
    fn unregister_purges_cooldown() {
        let mut fx = Fixture::new(ChatSettings {
            message_cooldown_secs: 60.0,
            ..ChatSettings::default()
        });
        let alice = fx.join("alice");
        fx.authority
            .submit(Some(&alice), Submission::new("hi", Channel::Global))
            .unwrap();
        assert_eq!(fx.authority.rate_limiter().len(), 1);

        assert!(fx.authority.unregister(&alice).is_some());
        assert!(fx.authority.unregister(&alice).is_none());
        assert!(fx.authority.rate_limiter().is_empty());
        assert!(!fx.authority.directory().contains(&alice));
    }

    #[test]
    fn unregistered_sender_is_refused_without_cooldown_state() {
        let mut fx = Fixture::new(no_cooldown());
        let alice = fx.join("alice");
        fx.authority.unregister(&alice);

        for channel in [Channel::Global, Channel::System] {
            let err = fx
                .authority
                .submit(Some(&alice), Submission::new("ghost", channel))
                .unwrap_err();
            assert_eq!(err, ChatError::Validation(ValidationError::MissingSender));
        }
        let stranger = Identity::new();
        assert!(
            fx.authority
                .submit(Some(&stranger), Submission::new("hi", Channel::Global))
                .is_err()
        );

        assert!(fx.authority.rate_limiter().is_empty());
        assert!(fx.authority.recent_messages(0).is_empty());
    }

    #[test]
    fn cooldown_record_matches_commit_timestamp() {
        let mut fx = Fixture::new(no_cooldown());
        let alice = fx.join("alice");
        fx.clock.advance(Duration::from_millis(1500));

        let committed = fx
            .authority
            .submit(Some(&alice), Submission::new("now", Channel::Global))
            .unwrap();
        assert_eq!(
            fx.authority.rate_limiter().last_accepted(&alice),
            Some(committed.message.timestamp)
        );
    }

    #[test]
    fn settings_are_validated_and_shrink_history() {
        let mut fx = Fixture::new(no_cooldown());
        let alice = fx.join("alice");
        for n in 0..4 {
            fx.authority
                .submit(Some(&alice), Submission::new(n.to_string(), Channel::Global))
                .unwrap();
        }

        let bad = ChatSettings {
            proximity_radius: f64::NAN,
            ..no_cooldown()
        };
        assert!(fx.authority.set_settings(bad).is_err());
        assert_eq!(fx.authority.settings(), &no_cooldown());

        fx.authority
            .set_settings(ChatSettings {
                max_history_size: 2,
                ..no_cooldown()
            })
            .unwrap();
        assert_eq!(fx.authority.recent_messages(0).len(), 2);
    }
}
