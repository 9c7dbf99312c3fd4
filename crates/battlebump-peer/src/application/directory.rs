//! The two directories the manager owns.
//!
//! - [`PeerDirectory`]: peers the browser has found and not yet lost, in
//!   discovery order, each with the moveset name it advertised.
//! - [`PlayerDirectory`]: the last [`Player`] received from each peer.
//!
//! Both live exactly as long as the manager that owns them.  The discovered
//! set is also emptied when a session ends, see
//! [`crate::application::coordinator::Coordinator::clear_discovered`].

use std::collections::HashMap;

use battlebump_core::{DiscoveryInfo, PeerIdentity, Player};

/// A peer seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub identity: PeerIdentity,
    /// Moveset the peer advertised.  The first non-empty value wins.
    pub moveset_name: Option<String>,
}

/// Set of discovered peers, at most one entry per identity.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Vec<DiscoveredPeer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a found peer.
    ///
    /// Adds the identity if absent.  Attaches the advertised moveset name
    /// only when none is recorded yet.  Returns `true` if the identity was new.
    pub fn record_found(&mut self, identity: PeerIdentity, info: &DiscoveryInfo) -> bool {
        let moveset_name = info.moveset_name().map(str::to_string);
        match self.peers.iter_mut().find(|p| p.identity == identity) {
            Some(existing) => {
                if existing.moveset_name.is_none() {
                    existing.moveset_name = moveset_name;
                }
                false
            }
            None => {
                self.peers.push(DiscoveredPeer {
                    identity,
                    moveset_name,
                });
                true
            }
        }
    }

    /// Removes a peer and its metadata.  Returns `false` if it was not present.
    pub fn remove(&mut self, identity: &PeerIdentity) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| &p.identity != identity);
        self.peers.len() != before
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.peers.iter().any(|p| &p.identity == identity)
    }

    pub fn moveset_name(&self, identity: &PeerIdentity) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| &p.identity == identity)
            .and_then(|p| p.moveset_name.as_deref())
    }

    /// Snapshot in discovery order.
    pub fn snapshot(&self) -> Vec<DiscoveredPeer> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every peer and all metadata.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

/// Last-received player per peer.  Entries are overwritten, never expired.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: HashMap<PeerIdentity, Player>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `player` as the latest state of `from`.
    pub fn upsert(&mut self, from: PeerIdentity, player: Player) {
        self.players.insert(from, player);
    }

    pub fn get(&self, identity: &PeerIdentity) -> Option<&Player> {
        self.players.get(identity)
    }

    pub fn snapshot(&self) -> HashMap<PeerIdentity, Player> {
        self.players.clone()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
