//! Session-layer vocabulary shared by every peer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Discovery namespace of the game.  Advertisers and browsers only see each
/// other when their tokens are identical.
pub const SERVICE_TOKEN: &str = "RPSgame";

/// The one discovery-metadata key a browser interprets.
pub const MOVESET_NAME_KEY: &str = "movesetName";

/// State of a session as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Invitation sent or received; handshake not finished yet.
    Connecting,
    /// Handshake complete; payloads may flow.
    Connected,
    /// The channel is gone.  Terminal for the session instance.
    NotConnected,
}

impl ConnectionState {
    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::NotConnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::NotConnected => "Not Connected",
        };
        f.write_str(label)
    }
}

/// String-keyed metadata attached to an advertisement.
///
/// The map is ordered so that encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo(BTreeMap<String, String>);

impl DiscoveryInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata advertising the given moveset.
    pub fn with_moveset_name(name: impl Into<String>) -> Self {
        let mut info = Self::new();
        info.insert(MOVESET_NAME_KEY, name);
        info
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The advertised moveset label, ignoring empty values.
    pub fn moveset_name(&self) -> Option<&str> {
        self.get(MOVESET_NAME_KEY).filter(|name| !name.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for DiscoveryInfo {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
