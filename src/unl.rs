//! The Unique Node List: a static whitelist of peer public keys authorized
//! to establish sessions. Modeled after the allowlist sets built from
//! config in reference p2p nodes (e.g. an `allow_peers` list folded into a
//! `HashSet` before the swarm starts) but keyed on our PEM identity string
//! rather than a libp2p `PeerId`.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Unl {
    members: HashSet<String>,
}

impl Unl {
    pub fn new(members: impl IntoIterator<Item = String>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    pub fn is_unl(&self, peer_id: &str) -> bool {
        self.members.contains(peer_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
