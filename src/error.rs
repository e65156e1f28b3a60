use thiserror::Error;

use crate::authority::dispatch::OperationKind;
use crate::common::Identity;

/// Why a submission failed content validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    Empty,
    #[error("message too long (max {max})")]
    TooLong { max: usize },
    #[error("invalid sender")]
    MissingSender,
    #[error("whisper requires a target")]
    MissingWhisperTarget,
}

/// Every failure the chat core can report back to a caller.
///
/// None of these are fatal: the `Display` text is the reason string handed to
/// the submitting client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("please wait {remaining_secs:.1} seconds before sending another message")]
    RateLimited { remaining_secs: f64 },

    #[error("only the authority can {operation}")]
    NotAuthority { operation: OperationKind },

    #[error("chat authority unavailable")]
    Unavailable,

    #[error("participant {identity} is already registered")]
    AlreadyRegistered { identity: Identity },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl ChatError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ChatError::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_human_readable() {
        let err: ChatError = ValidationError::TooLong { max: 10 }.into();
        assert_eq!(err.to_string(), "message too long (max 10)");

        let err = ChatError::RateLimited {
            remaining_secs: 0.2,
        };
        assert_eq!(
            err.to_string(),
            "please wait 0.2 seconds before sending another message"
        );

        let err = ChatError::NotAuthority {
            operation: OperationKind::SetSettings,
        };
        assert_eq!(err.to_string(), "only the authority can change settings");
    }
}
