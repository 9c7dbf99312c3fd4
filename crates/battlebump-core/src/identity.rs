//! Peer identity.
//!
//! A [`PeerIdentity`] is created once per running manager and never changes.
//! Two identities are equal only when both the UUID and the display name
//! match, so two devices that happen to share a hostname are still distinct.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback display name when the device name cannot be determined.
const DEFAULT_DISPLAY_NAME: &str = "battlebump-player";

/// Stable identifier of one endpoint taking part in discovery and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity {
    id: Uuid,
    display_name: String,
}

impl PeerIdentity {
    /// Creates a fresh identity with a random UUID and the given name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Reassembles an identity received over the wire.
    pub fn from_parts(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Creates an identity named after the local device.
    pub fn for_this_device() -> Self {
        Self::new(device_name())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable name shown to the other player.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Best-effort human-readable name of this machine.
pub fn device_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}
