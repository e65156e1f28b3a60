//! Recipient resolution per channel.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::common::{ChatMessage, Channel, Identity};

use super::directory::RecipientDirectory;
use super::presence::PresenceTable;

/// Team membership supplied by the deployment. The chat core has no team
/// model of its own.
pub trait TeamPartition: Send + Sync + Debug {
    type Team: PartialEq;

    fn team_of(&self, identity: &Identity) -> Option<Self::Team>;
}

/// Object-safe view of a [`TeamPartition`]: answers "same team?" directly.
pub trait TeamMembership: Send + Sync + Debug {
    /// `None` when the partition has no team for `sender`.
    fn teammates(&self, sender: &Identity, candidate: &Identity) -> Option<bool>;
}

impl<P: TeamPartition> TeamMembership for P {
    fn teammates(&self, sender: &Identity, candidate: &Identity) -> Option<bool> {
        let team = self.team_of(sender)?;
        Some(self.team_of(candidate).is_some_and(|other| other == team))
    }
}

/// How the Team channel is scoped.
#[derive(Debug, Clone, Default)]
pub enum TeamRouting {
    /// No partition configured: team messages go to everyone. Logged as a
    /// warning every time it happens.
    #[default]
    Degraded,
    Partitioned(Arc<dyn TeamMembership>),
}

/// Everything resolution needs besides the message itself.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub directory: &'a RecipientDirectory,
    pub presence: &'a PresenceTable,
    pub proximity_radius: f64,
    pub teams: &'a TeamRouting,
}

/// Identities that should receive `message`, each once, in ascending order.
/// Only identities present in the directory are returned.
pub fn resolve(message: &ChatMessage, ctx: RouteContext<'_>) -> Vec<Identity> {
    match message.channel {
        Channel::Global | Channel::System | Channel::Custom => everyone(ctx.directory),
        Channel::Team => team(message, ctx),
        Channel::Whisper => whisper(message, ctx.directory),
        Channel::Proximity => proximity(message, ctx),
    }
}

fn everyone(directory: &RecipientDirectory) -> Vec<Identity> {
    directory.identities().copied().collect()
}

fn team(message: &ChatMessage, ctx: RouteContext<'_>) -> Vec<Identity> {
    let Some(sender) = message.sender else {
        return Vec::new();
    };

    if let TeamRouting::Partitioned(membership) = ctx.teams {
        let mut scoped = Vec::new();
        let mut known = true;
        for candidate in ctx.directory.identities() {
            match membership.teammates(&sender, candidate) {
                Some(true) => scoped.push(*candidate),
                Some(false) => {}
                None => {
                    known = false;
                    break;
                }
            }
        }
        if known {
            return scoped;
        }
        log::warn!("Sender {sender} has no team in the configured partition; falling back to everyone");
    } else {
        log::warn!("Team routing has no partition configured; delivering team message to everyone");
    }

    everyone(ctx.directory)
}

fn whisper(message: &ChatMessage, directory: &RecipientDirectory) -> Vec<Identity> {
    let Some(target) = message.whisper_target else {
        return Vec::new();
    };

    // The sender always gets an echo of their own whisper.
    let recipients: BTreeSet<Identity> = [Some(target), message.sender]
        .into_iter()
        .flatten()
        .filter(|identity| directory.contains(identity))
        .collect();
    recipients.into_iter().collect()
}

fn proximity(message: &ChatMessage, ctx: RouteContext<'_>) -> Vec<Identity> {
    let Some(origin) = message
        .sender
        .and_then(|sender| ctx.presence.position(&sender))
    else {
        log::debug!("Proximity message {} has no sender position; no recipients", message.id);
        return Vec::new();
    };

    let radius_squared = ctx.proximity_radius * ctx.proximity_radius;
    ctx.directory
        .identities()
        .filter(|candidate| {
            ctx.presence
                .position(candidate)
                .is_some_and(|position| origin.distance_squared(&position) <= radius_squared)
        })
        .copied()
        .collect()
}
