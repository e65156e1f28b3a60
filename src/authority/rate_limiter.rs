//! Per-sender cooldown tracking.
//!
//! Only the timestamp of the last accepted submission is kept per identity.
//! An identity with no entry has no cooldown.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::clock::seconds_between;
use crate::common::Identity;
use crate::error::ChatError;

#[derive(Debug, Default)]
pub struct RateLimiter {
    last_accepted: HashMap<Identity, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects with the exact remaining seconds while `sender` is cooling
    /// down; otherwise records `now` as its last accepted time.
    pub fn check_and_record(
        &mut self,
        sender: &Identity,
        now: DateTime<Utc>,
        cooldown_secs: f64,
    ) -> Result<(), ChatError> {
        if let Some(last) = self.last_accepted.get(sender) {
            let elapsed = seconds_between(*last, now);
            if elapsed < cooldown_secs {
                return Err(ChatError::RateLimited {
                    remaining_secs: cooldown_secs - elapsed,
                });
            }
        }

        self.last_accepted.insert(*sender, now);
        Ok(())
    }

    pub fn last_accepted(&self, sender: &Identity) -> Option<DateTime<Utc>> {
        self.last_accepted.get(sender).copied()
    }

    pub fn remove(&mut self, sender: &Identity) -> bool {
        self.last_accepted.remove(sender).is_some()
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
