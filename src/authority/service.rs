use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{ChatMessage, ChatSettings, Color, Identity, Inbound, Position, Submission};
use crate::error::ChatError;

use super::directory::{DeliveryStatus, Endpoint, Participant};
use super::dispatch::{Caller, OperationKind, Role};
use super::{ChatAuthority, Committed};

type Reply<T> = oneshot::Sender<Result<T, ChatError>>;

/// Requests queued to the authority task.
enum Request {
    Submit {
        submission: Submission,
        /// `None` for fire-and-forget client posts; failures then come back
        /// as [`Inbound::Failed`].
        reply: Option<Reply<ChatMessage>>,
    },
    BroadcastSystem {
        content: String,
        color: Color,
        reply: Reply<ChatMessage>,
    },
    GetSettings {
        reply: Reply<ChatSettings>,
    },
    SetSettings {
        settings: ChatSettings,
        reply: Reply<()>,
    },
    ClearHistory {
        reply: Reply<()>,
    },
    GetRecentMessages {
        count: usize,
        reply: Reply<Vec<ChatMessage>>,
    },
    Register {
        participant: Participant,
        reply: Reply<bool>,
    },
    Unregister {
        identity: Identity,
        reply: Reply<bool>,
    },
    UpdatePosition {
        identity: Identity,
        position: Option<Position>,
        reply: Reply<()>,
    },
}

impl Request {
    fn kind(&self) -> OperationKind {
        match self {
            Request::Submit { .. } => OperationKind::Submit,
            Request::BroadcastSystem { .. } => OperationKind::BroadcastSystem,
            Request::GetSettings { .. } => OperationKind::GetSettings,
            Request::SetSettings { .. } => OperationKind::SetSettings,
            Request::ClearHistory { .. } => OperationKind::ClearHistory,
            Request::GetRecentMessages { .. } => OperationKind::GetRecentMessages,
            Request::Register { .. } => OperationKind::Register,
            Request::Unregister { .. } => OperationKind::Unregister,
            Request::UpdatePosition { .. } => OperationKind::UpdatePosition,
        }
    }

    fn subject(&self) -> Option<&Identity> {
        match self {
            Request::Unregister { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Answers the request with `err` without running it.
    fn refuse(self, err: ChatError) -> Option<ChatError> {
        match self {
            Request::Submit { reply: None, .. } => return Some(err),
            Request::Submit {
                reply: Some(reply), ..
            }
            | Request::BroadcastSystem { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Request::GetSettings { reply } => {
                let _ = reply.send(Err(err));
            }
            Request::SetSettings { reply, .. }
            | Request::ClearHistory { reply }
            | Request::UpdatePosition { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Request::GetRecentMessages { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Request::Register { reply, .. } | Request::Unregister { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
        None
    }
}

struct Envelope {
    caller: Caller,
    request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Bounded queue between handles and the authority task.
    pub request_capacity: usize,
    /// Per-client inbox size.
    pub inbox_capacity: usize,
    /// Recent messages replayed to a participant when it joins.
    pub join_replay: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            request_capacity: 256,
            inbox_capacity: 256,
            join_replay: 20,
        }
    }
}

/// The task that owns a [`ChatAuthority`]. Requests are applied one at a time
/// in arrival order, which is the only synchronisation the core relies on.
pub struct AuthorityService {
    authority: ChatAuthority,
    requests: mpsc::Receiver<Envelope>,
    options: ServiceOptions,
}

impl AuthorityService {
    pub fn new(authority: ChatAuthority, options: ServiceOptions) -> (Self, AuthorityHandle) {
        let (tx, rx) = mpsc::channel(options.request_capacity.max(1));
        let service = Self {
            authority,
            requests: rx,
            options,
        };
        let handle = AuthorityHandle {
            requests: tx,
            caller: Caller::Authority,
            inbox_capacity: options.inbox_capacity.max(1),
        };
        (service, handle)
    }

    /// Spawns the service on the current tokio runtime.
    pub fn spawn(authority: ChatAuthority, options: ServiceOptions) -> (AuthorityHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(authority, options);
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        log::info!("Chat authority started");
        while let Some(Envelope { caller, request }) = self.requests.recv().await {
            self.dispatch(caller, request);
        }
        log::info!(
            "Chat authority stopped with {} participant(s) registered",
            self.authority.directory().len()
        );
    }

    fn dispatch(&mut self, caller: Caller, request: Request) {
        let kind = request.kind();
        if let Err(err) = kind.authorize(&caller, request.subject()) {
            log::warn!("Refused {kind:?} from {caller:?}: {err}");
            if let Some(err) = request.refuse(err) {
                self.notify_failure(&caller, &err);
            }
            return;
        }

        match request {
            Request::Submit { submission, reply } => {
                let sender = caller.identity();
                match self.authority.submit(sender.as_ref(), submission) {
                    Ok(committed) => {
                        let message = committed.message.clone();
                        self.fan_out(committed);
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(message));
                        }
                    }
                    Err(err) => {
                        self.notify_failure(&caller, &err);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(err));
                        }
                    }
                }
            }
            Request::BroadcastSystem {
                content,
                color,
                reply,
            } => {
                let committed = self.authority.broadcast_system(content, color);
                let message = committed.message.clone();
                self.fan_out(committed);
                let _ = reply.send(Ok(message));
            }
            Request::GetSettings { reply } => {
                let _ = reply.send(Ok(self.authority.settings().clone()));
            }
            Request::SetSettings { settings, reply } => {
                let _ = reply.send(self.authority.set_settings(settings));
            }
            Request::ClearHistory { reply } => {
                self.authority.clear_history();
                let _ = reply.send(Ok(()));
            }
            Request::GetRecentMessages { count, reply } => {
                let _ = reply.send(Ok(self.authority.recent_messages(count)));
            }
            Request::Register { participant, reply } => {
                let added = self.join(participant);
                let _ = reply.send(Ok(added));
            }
            Request::Unregister { identity, reply } => {
                let removed = self.leave(&identity);
                let _ = reply.send(Ok(removed));
            }
            Request::UpdatePosition {
                identity,
                position,
                reply,
            } => {
                self.authority.update_position(identity, position);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn join(&mut self, participant: Participant) -> bool {
        let identity = participant.identity;
        let display_name = participant.display_name.clone();
        let endpoint = participant.endpoint.clone();
        if !self.authority.register(participant) {
            return false;
        }

        // Replay never exceeds the inbox, so a fresh client can't be overrun
        // before it starts reading.
        let replay = self.options.join_replay.min(endpoint.capacity());
        if replay > 0 {
            for message in self.authority.recent_messages(replay) {
                endpoint.push(Inbound::Deliver(message));
            }
        }

        let others: Vec<Identity> = self
            .authority
            .directory()
            .identities()
            .filter(|other| **other != identity)
            .copied()
            .collect();
        self.push_all(
            &others,
            Inbound::Joined {
                identity,
                display_name,
            },
        );
        true
    }

    fn leave(&mut self, identity: &Identity) -> bool {
        let Some(participant) = self.authority.unregister(identity) else {
            return false;
        };
        let remaining: Vec<Identity> = self.authority.directory().identities().copied().collect();
        self.push_all(
            &remaining,
            Inbound::Left {
                identity: participant.identity,
                display_name: participant.display_name,
            },
        );
        true
    }

    fn fan_out(&mut self, committed: Committed) {
        let Committed {
            message,
            recipients,
        } = committed;
        self.push_all(&recipients, Inbound::Deliver(message));
    }

    /// Pushes a copy of `inbound` to each recipient. Recipients whose inbox
    /// has closed are unregistered afterwards.
    fn push_all(&mut self, recipients: &[Identity], inbound: Inbound) {
        let mut closed = Vec::new();
        for identity in recipients {
            let Some(participant) = self.authority.directory().get(identity) else {
                continue;
            };
            match participant.endpoint.push(inbound.clone()) {
                DeliveryStatus::Delivered => {}
                DeliveryStatus::Dropped => {
                    log::warn!(
                        "Inbox of {} ({identity}) is full; dropping notification",
                        participant.display_name
                    );
                }
                DeliveryStatus::Closed => closed.push(*identity),
            }
        }

        for identity in closed {
            log::info!("Participant {identity} went away without unregistering");
            self.leave(&identity);
        }
    }

    fn notify_failure(&mut self, caller: &Caller, err: &ChatError) {
        let Caller::Client(identity) = caller else {
            return;
        };
        let reason = err.to_string();
        self.push_all(&[*identity], Inbound::Failed { reason });
    }
}

/// Cloneable, role-scoped access to a running authority.
///
/// The handle returned by [`AuthorityService::new`] acts as the authority
/// itself; [`AuthorityHandle::register`] hands out client-scoped handles whose
/// submissions are attributed to that client.
#[derive(Debug, Clone)]
pub struct AuthorityHandle {
    requests: mpsc::Sender<Envelope>,
    caller: Caller,
    inbox_capacity: usize,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("caller", &self.caller)
            .field("operation", &self.request.kind())
            .finish()
    }
}

impl AuthorityHandle {
    pub fn caller(&self) -> Caller {
        self.caller
    }

    pub fn role(&self) -> Role {
        self.caller.role()
    }

    /// Fire-and-forget post. Acceptance shows up as a delivery in the
    /// caller's inbox; rejection as [`Inbound::Failed`]. Only fails if the
    /// authority is gone.
    pub async fn submit(&self, submission: Submission) -> Result<(), ChatError> {
        self.send(Request::Submit {
            submission,
            reply: None,
        })
        .await
    }

    /// Like [`submit`](Self::submit) but waits for the verdict.
    pub async fn submit_and_wait(&self, submission: Submission) -> Result<ChatMessage, ChatError> {
        self.call(|reply| Request::Submit {
            submission,
            reply: Some(reply),
        })
        .await
    }

    pub async fn broadcast_system(
        &self,
        content: impl Into<String>,
        color: Color,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.into();
        self.call(|reply| Request::BroadcastSystem {
            content,
            color,
            reply,
        })
        .await
    }

    pub async fn settings(&self) -> Result<ChatSettings, ChatError> {
        self.call(|reply| Request::GetSettings { reply }).await
    }

    pub async fn set_settings(&self, settings: ChatSettings) -> Result<(), ChatError> {
        self.call(|reply| Request::SetSettings { settings, reply })
            .await
    }

    pub async fn clear_history(&self) -> Result<(), ChatError> {
        self.call(|reply| Request::ClearHistory { reply }).await
    }

    /// `0` returns the whole buffer.
    pub async fn recent_messages(&self, count: usize) -> Result<Vec<ChatMessage>, ChatError> {
        self.call(|reply| Request::GetRecentMessages { count, reply })
            .await
    }

    pub async fn update_position(
        &self,
        identity: Identity,
        position: Option<Position>,
    ) -> Result<(), ChatError> {
        self.call(|reply| Request::UpdatePosition {
            identity,
            position,
            reply,
        })
        .await
    }

    /// Connects a participant. Returns a handle scoped to that participant and
    /// the receiving end of its inbox. An identity that is already registered
    /// is refused and its existing registration is left untouched.
    pub async fn register(
        &self,
        identity: Identity,
        display_name: impl Into<String>,
    ) -> Result<(AuthorityHandle, mpsc::Receiver<Inbound>), ChatError> {
        OperationKind::Register.authorize(&self.caller, None)?;

        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        let participant = Participant {
            identity,
            display_name: display_name.into(),
            endpoint: Endpoint::new(tx),
        };
        let added = self
            .call(|reply| Request::Register { participant, reply })
            .await?;
        if !added {
            log::warn!("Participant {identity} is already registered");
            return Err(ChatError::AlreadyRegistered { identity });
        }

        let scoped = AuthorityHandle {
            requests: self.requests.clone(),
            caller: Caller::Client(identity),
            inbox_capacity: self.inbox_capacity,
        };
        Ok((scoped, rx))
    }

    /// Returns `true` if the identity was registered.
    pub async fn unregister(&self, identity: Identity) -> Result<bool, ChatError> {
        self.call(|reply| Request::Unregister { identity, reply })
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    async fn send(&self, request: Request) -> Result<(), ChatError> {
        self.requests
            .send(Envelope {
                caller: self.caller,
                request,
            })
            .await
            .map_err(|_| ChatError::Unavailable)
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| ChatError::Unavailable)?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::common::Channel;
    use crate::error::ValidationError;

    fn spawn(settings: ChatSettings) -> AuthorityHandle {
        let authority = ChatAuthority::new(settings, Arc::new(SystemClock)).unwrap();
        AuthorityService::spawn(authority, ServiceOptions::default()).0
    }

    #[tokio::test]
    async fn client_handles_cannot_use_privileged_operations() {
        let authority = spawn(ChatSettings::default());
        let (client, _inbox) = authority.register(Identity::new(), "alice").await.unwrap();

        assert_eq!(client.role(), Role::Client);
        assert_eq!(
            client.broadcast_system("hi", Color::YELLOW).await.unwrap_err(),
            ChatError::NotAuthority {
                operation: OperationKind::BroadcastSystem
            }
        );
        assert!(client.set_settings(ChatSettings::default()).await.is_err());
        assert!(client.clear_history().await.is_err());
        assert!(client.recent_messages(0).await.is_err());
        assert!(client.register(Identity::new(), "bob").await.is_err());
        assert!(client.settings().await.is_ok());
    }

    #[tokio::test]
    async fn rejected_post_comes_back_as_failure() {
        let authority = spawn(ChatSettings {
            max_message_length: 10,
            ..ChatSettings::default()
        });
        let (client, mut inbox) = authority.register(Identity::new(), "alice").await.unwrap();

        client
            .submit(Submission::new("x".repeat(11), Channel::Global))
            .await
            .unwrap();
        assert_eq!(
            inbox.recv().await,
            Some(Inbound::Failed {
                reason: "message too long (max 10)".to_string()
            })
        );
    }

    #[tokio::test]
    async fn authority_submit_needs_system_channel() {
        let authority = spawn(ChatSettings::default());
        let err = authority
            .submit_and_wait(Submission::new("hi", Channel::Global))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid sender");

        let message = authority
            .submit_and_wait(Submission::new("maintenance at noon", Channel::System))
            .await
            .unwrap();
        assert_eq!(message.sender, None);
    }

    #[tokio::test]
    async fn dropped_inbox_is_purged_on_next_delivery() {
        let authority = spawn(ChatSettings::default());
        let alice = Identity::new();
        let (_client, inbox) = authority.register(alice, "alice").await.unwrap();
        drop(inbox);

        authority
            .broadcast_system("anyone there?", Color::YELLOW)
            .await
            .unwrap();
        assert!(!authority.unregister(alice).await.unwrap());
    }

    #[tokio::test]
    async fn handle_outliving_its_registration_cannot_post() {
        let authority = spawn(ChatSettings::default());
        let (bob_client, mut bob_inbox) =
            authority.register(Identity::new(), "bob").await.unwrap();
        let alice = Identity::new();
        let (client, _inbox) = authority.register(alice, "alice").await.unwrap();
        assert!(bob_client.settings().await.is_ok());
        while bob_inbox.try_recv().is_ok() {}

        assert!(client.unregister(alice).await.unwrap());
        let err = client
            .submit_and_wait(Submission::new("still here", Channel::Global))
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::MissingSender));

        assert!(authority.recent_messages(0).await.unwrap().is_empty());
        // Only the departure notice reached bob.
        assert!(matches!(bob_inbox.try_recv(), Ok(Inbound::Left { .. })));
        assert!(bob_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn purged_participant_cannot_post() {
        let authority = spawn(ChatSettings::default());
        let alice = Identity::new();
        let (client, inbox) = authority.register(alice, "alice").await.unwrap();
        drop(inbox);
        authority
            .broadcast_system("anyone there?", Color::YELLOW)
            .await
            .unwrap();

        assert!(
            client
                .submit_and_wait(Submission::new("back again", Channel::Global))
                .await
                .is_err()
        );
        assert_eq!(authority.recent_messages(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let authority = spawn(ChatSettings::default());
        let alice = Identity::new();
        let (_client, mut inbox) = authority.register(alice, "alice").await.unwrap();

        assert_eq!(
            authority.register(alice, "mallory").await.unwrap_err(),
            ChatError::AlreadyRegistered { identity: alice }
        );

        // The first registration keeps its name and a working inbox.
        authority
            .broadcast_system("still you?", Color::YELLOW)
            .await
            .unwrap();
        assert!(matches!(inbox.recv().await, Some(Inbound::Deliver(_))));
        assert!(authority.unregister(alice).await.unwrap());
    }

    #[tokio::test]
    async fn late_joiner_gets_replay() {
        let authority = spawn(ChatSettings::default());
        for n in 0..3 {
            authority
                .broadcast_system(format!("notice {n}"), Color::YELLOW)
                .await
                .unwrap();
        }
        let (_client, mut inbox) = authority.register(Identity::new(), "late").await.unwrap();
        for n in 0..3 {
            match inbox.recv().await {
                Some(Inbound::Deliver(message)) => assert_eq!(message.content, format!("notice {n}")),
                other => panic!("expected replay, got {other:?}"),
            }
        }
    }
}
