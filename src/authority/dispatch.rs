//! Role-checked dispatch table.
//!
//! Every operation reachable through an [`AuthorityHandle`](super::AuthorityHandle)
//! is tagged with the roles allowed to invoke it, and the service checks the
//! caller against that table before touching any state.

use std::fmt;

use crate::common::Identity;
use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Authority,
    Client,
}

/// Who is on the other end of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Authority,
    Client(Identity),
}

impl Caller {
    pub fn role(&self) -> Role {
        match self {
            Caller::Authority => Role::Authority,
            Caller::Client(_) => Role::Client,
        }
    }

    /// The sender identity a submission from this caller carries.
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Caller::Authority => None,
            Caller::Client(identity) => Some(*identity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Submit,
    BroadcastSystem,
    GetSettings,
    SetSettings,
    ClearHistory,
    GetRecentMessages,
    Register,
    Unregister,
    UpdatePosition,
}

impl OperationKind {
    pub const fn permitted_roles(self) -> &'static [Role] {
        match self {
            OperationKind::Submit | OperationKind::GetSettings | OperationKind::Unregister => {
                &[Role::Authority, Role::Client]
            }
            OperationKind::BroadcastSystem
            | OperationKind::SetSettings
            | OperationKind::ClearHistory
            | OperationKind::GetRecentMessages
            | OperationKind::Register
            | OperationKind::UpdatePosition => &[Role::Authority],
        }
    }

    pub fn permits(self, role: Role) -> bool {
        self.permitted_roles().contains(&role)
    }

    /// Checks the caller against the table. `subject` is the identity the
    /// operation acts on, if any; clients may only act on themselves.
    pub fn authorize(self, caller: &Caller, subject: Option<&Identity>) -> Result<(), ChatError> {
        let denied = ChatError::NotAuthority { operation: self };
        if !self.permits(caller.role()) {
            return Err(denied);
        }
        match (caller, subject) {
            (Caller::Client(own), Some(subject)) if own != subject => Err(denied),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            OperationKind::Submit => "submit messages",
            OperationKind::BroadcastSystem => "broadcast system messages",
            OperationKind::GetSettings => "read settings",
            OperationKind::SetSettings => "change settings",
            OperationKind::ClearHistory => "clear history",
            OperationKind::GetRecentMessages => "read history",
            OperationKind::Register => "register participants",
            OperationKind::Unregister => "unregister participants",
            OperationKind::UpdatePosition => "update positions",
        };
        f.write_str(action)
    }
}
