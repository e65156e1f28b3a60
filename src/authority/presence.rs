use std::collections::HashMap;

use crate::common::{Identity, Position};

/// Side table of transient per-participant attributes, fed by the world model.
#[derive(Debug, Default)]
pub struct PresenceTable {
    positions: HashMap<Identity, Position>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` clears the position, e.g. when the participant has no avatar.
    pub fn set_position(&mut self, identity: Identity, position: Option<Position>) {
        match position {
            Some(position) => {
                self.positions.insert(identity, position);
            }
            None => {
                self.positions.remove(&identity);
            }
        }
    }

    pub fn position(&self, identity: &Identity) -> Option<Position> {
        self.positions.get(identity).copied()
    }

    pub fn remove(&mut self, identity: &Identity) {
        self.positions.remove(identity);
    }
}
