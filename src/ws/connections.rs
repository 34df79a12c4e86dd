//! Live connection bookkeeping: at most one socket per identity

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Identity -> live connection id
#[derive(Default)]
pub struct ConnectionRegistry {
    live: DashMap<Uuid, Uuid>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity` for `connection`. False if the identity is already connected.
    pub fn try_register(&self, identity: Uuid, connection: Uuid) -> bool {
        match self.live.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    /// Release `identity` if it is still held by `connection`
    pub fn release(&self, identity: Uuid, connection: Uuid) {
        self.live.remove_if(&identity, |_, held| *held == connection);
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
