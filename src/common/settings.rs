use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Chat tuning owned by the authority and readable by everyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub max_message_length: usize,
    pub message_cooldown_secs: f64,
    pub max_history_size: usize,
    /// World units; compared squared against sender distance.
    pub proximity_radius: f64,
    pub allow_empty_messages: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: 256,
            message_cooldown_secs: 0.5,
            max_history_size: 100,
            proximity_radius: 1000.0,
            allow_empty_messages: false,
        }
    }
}

impl ChatSettings {
    pub fn validate(&self) -> Result<(), ChatError> {
        if !self.message_cooldown_secs.is_finite() || self.message_cooldown_secs < 0.0 {
            return Err(ChatError::InvalidSettings(format!(
                "message cooldown must be a non-negative number of seconds, got {}",
                self.message_cooldown_secs
            )));
        }
        if !self.proximity_radius.is_finite() || self.proximity_radius < 0.0 {
            return Err(ChatError::InvalidSettings(format!(
                "proximity radius must be non-negative, got {}",
                self.proximity_radius
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_cooldown() {
        let settings = ChatSettings {
            message_cooldown_secs: -1.0,
            ..ChatSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ChatError::InvalidSettings(_))
        ));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: ChatSettings =
            serde_json::from_str(r#"{"max_message_length": 10}"#).unwrap();
        assert_eq!(settings.max_message_length, 10);
        assert_eq!(settings.max_history_size, 100);
        assert!(settings.validate().is_ok());
    }
}
