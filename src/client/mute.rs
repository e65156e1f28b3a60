use std::collections::BTreeSet;

use crate::common::Identity;

/// Identities one agent has muted. Purely local; never sent anywhere.
#[derive(Debug, Clone)]
pub struct MuteList {
    owner: Identity,
    muted: BTreeSet<Identity>,
}

impl MuteList {
    pub fn new(owner: Identity) -> Self {
        Self {
            owner,
            muted: BTreeSet::new(),
        }
    }

    /// Returns `true` if `identity` was newly muted. Muting yourself is a no-op.
    pub fn mute(&mut self, identity: Identity) -> bool {
        if identity == self.owner {
            return false;
        }
        self.muted.insert(identity)
    }

    pub fn unmute(&mut self, identity: &Identity) -> bool {
        self.muted.remove(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.muted.contains(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.muted.iter()
    }

    /// Empties the list and returns what was in it.
    pub fn clear(&mut self) -> Vec<Identity> {
        std::mem::take(&mut self.muted).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.muted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.muted.is_empty()
    }
}
