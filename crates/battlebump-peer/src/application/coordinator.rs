//! The manager's core: every transport event goes through here.
//!
//! [`Coordinator`] owns the discovered-peer directory, the connected-player
//! directory and the single session slot.  Each handler returns the
//! [`ManagerEvent`]s the UI must see, in order; the caller publishes them
//! after the handler has returned, so no internal state is borrowed while
//! the UI runs.
//!
//! # Single session
//!
//! ```text
//!   slot: None ──invite accepted / join──► Some(session)
//!   Some(live)      ──incoming invite──►  ignored (InviteIgnored)
//!   Some(terminal)  ──incoming invite──►  replaced
//!   Some(any)       ──join──────────────►  replaced
//! ```
//!
//! Every session carries a [`SessionId`].  Transport events tagged with the
//! id of a replaced session are dropped, so a slow teardown of an old
//! session can never clear state belonging to its successor.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use battlebump_core::{
    decode_player, encode_player, ConnectionState, DiscoveryInfo, PeerIdentity, Player,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::directory::{DiscoveredPeer, PeerDirectory, PlayerDirectory};
use crate::application::error::{PeerError, TransmitError};
use crate::application::session_state::SessionStateMachine;

/// Identifies one session instance for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outward notifications, in the order they happened.
#[derive(Debug)]
pub enum ManagerEvent {
    /// A valid player payload arrived.
    PeerDataReceived { player: Player, from: PeerIdentity },
    /// The session reported `Connecting` or `NotConnected`.
    SessionStateChanged(ConnectionState),
    /// A peer was found or lost.  Carries the whole current set.
    DiscoveredPeersChanged(Vec<DiscoveredPeer>),
    /// The session entered `Connected`.
    ConnectedToPeer,
    /// A failure was swallowed.  Only emitted when error reporting is on.
    ErrorOccurred(PeerError),
}

/// A player ready to be handed to the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundData {
    pub session: SessionId,
    pub bytes: Vec<u8>,
    pub recipients: Vec<PeerIdentity>,
}

#[derive(Debug)]
struct SessionSlot {
    id: SessionId,
    /// Remote identities currently connected.  Empty until `Connected`.
    remotes: BTreeSet<PeerIdentity>,
    machine: SessionStateMachine,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            id: SessionId::new(),
            remotes: BTreeSet::new(),
            machine: SessionStateMachine::new(),
        }
    }
}

/// Manager state and the rules that mutate it.  Not thread-safe on purpose:
/// exactly one task owns it.
#[derive(Debug)]
pub struct Coordinator {
    local: PeerIdentity,
    discovered: PeerDirectory,
    players: PlayerDirectory,
    session: Option<SessionSlot>,
    report_errors: bool,
}

impl Coordinator {
    pub fn new(local: PeerIdentity, report_errors: bool) -> Self {
        Self {
            local,
            discovered: PeerDirectory::new(),
            players: PlayerDirectory::new(),
            session: None,
            report_errors,
        }
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Browser saw `identity` advertising `info`.
    pub fn peer_found(&mut self, identity: PeerIdentity, info: &DiscoveryInfo) -> Vec<ManagerEvent> {
        let added = self.discovered.record_found(identity.clone(), info);
        debug!(peer = %identity, added, "peer found");
        vec![ManagerEvent::DiscoveredPeersChanged(self.discovered.snapshot())]
    }

    /// Browser lost `identity`.  Unknown identities are ignored.
    pub fn peer_lost(&mut self, identity: &PeerIdentity) -> Vec<ManagerEvent> {
        if !self.discovered.remove(identity) {
            debug!(peer = %identity, "lost a peer that was never found; ignoring");
            return Vec::new();
        }
        debug!(peer = %identity, "peer lost");
        vec![ManagerEvent::DiscoveredPeersChanged(self.discovered.snapshot())]
    }

    /// Empties the discovered-peer set and all advertised metadata.
    ///
    /// Runs whenever the session reaches `NotConnected`.  Does not notify.
    pub fn clear_discovered(&mut self) {
        if !self.discovered.is_empty() {
            debug!(count = self.discovered.len(), "clearing discovered peers");
        }
        self.discovered.clear();
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    /// `true` when an incoming invitation would be accepted.
    pub fn accepts_invitations(&self) -> bool {
        self.session
            .as_ref()
            .map_or(true, |slot| slot.machine.is_terminal())
    }

    /// Installs a session for an incoming invitation from `from`.
    ///
    /// # Errors
    ///
    /// [`PeerError::InviteIgnored`] when a live session already exists.  The
    /// slot is left untouched.
    pub fn invitation_received(&mut self, from: PeerIdentity) -> Result<SessionId, PeerError> {
        if !self.accepts_invitations() {
            return Err(PeerError::InviteIgnored(from));
        }
        let slot = SessionSlot::new();
        let id = slot.id;
        info!(local = %self.local, peer = %from, session = %id, "accepting invitation");
        self.session = Some(slot);
        Ok(id)
    }

    /// Installs a session for an outbound join, replacing any previous one.
    pub fn begin_join(&mut self, target: &PeerIdentity) -> SessionId {
        let slot = SessionSlot::new();
        let id = slot.id;
        if let Some(old) = self.session.replace(slot) {
            debug!(old = %old.id, state = %old.machine.state(), "replacing session");
        }
        info!(local = %self.local, peer = %target, session = %id, "inviting peer");
        id
    }

    /// The transport reported a state for `session` involving `peer`.
    pub fn state_changed(
        &mut self,
        session: SessionId,
        peer: &PeerIdentity,
        state: ConnectionState,
    ) -> Vec<ManagerEvent> {
        let Some(slot) = self.session.as_mut().filter(|slot| slot.id == session) else {
            debug!(session = %session, state = %state, "state report from a replaced session");
            return Vec::new();
        };

        if let Err(err) = slot.machine.apply(state) {
            warn!(session = %session, peer = %peer, "{err}; ignoring");
            return Vec::new();
        }

        match state {
            ConnectionState::Connecting => {
                info!(session = %session, peer = %peer, "session connecting");
                vec![ManagerEvent::SessionStateChanged(ConnectionState::Connecting)]
            }
            ConnectionState::Connected => {
                slot.remotes.insert(peer.clone());
                info!(session = %session, peer = %peer, "connected to peer");
                vec![ManagerEvent::ConnectedToPeer]
            }
            ConnectionState::NotConnected => {
                slot.remotes.clear();
                info!(session = %session, peer = %peer, "session interrupted");
                self.clear_discovered();
                vec![ManagerEvent::SessionStateChanged(ConnectionState::NotConnected)]
            }
        }
    }

    /// Bytes arrived on `session` from `from`.
    pub fn data_received(
        &mut self,
        session: SessionId,
        from: PeerIdentity,
        bytes: &[u8],
    ) -> Vec<ManagerEvent> {
        if self.session_id() != Some(session) {
            debug!(session = %session, peer = %from, "data from a replaced session");
            return Vec::new();
        }

        match decode_player(bytes) {
            Ok(player) => {
                debug!(peer = %from, len = bytes.len(), "player data received");
                self.players.upsert(from.clone(), player.clone());
                vec![ManagerEvent::PeerDataReceived { player, from }]
            }
            Err(source) => self.failure(PeerError::Decode { from, source }),
        }
    }

    /// Encodes `player` for the current session.
    ///
    /// # Errors
    ///
    /// A [`TransmitError`] when there is no session, it is not `Connected`,
    /// or it has no connected peer; [`PeerError::Encode`] if encoding fails.
    /// Nothing reaches the transport in any of these cases.
    pub fn prepare_send(&self, player: &Player) -> Result<OutboundData, PeerError> {
        let slot = self.session.as_ref().ok_or(TransmitError::NoSession)?;
        if !slot.machine.is_connected() {
            return Err(TransmitError::NotConnected(slot.machine.state()).into());
        }
        if slot.remotes.is_empty() {
            return Err(TransmitError::NoConnectedPeers.into());
        }
        let bytes = encode_player(player).map_err(PeerError::Encode)?;
        Ok(OutboundData {
            session: slot.id,
            bytes,
            recipients: slot.remotes.iter().cloned().collect(),
        })
    }

    /// Logs a swallowed failure and, when enabled, mirrors it to the UI.
    pub fn failure(&self, err: PeerError) -> Vec<ManagerEvent> {
        warn!("{err}");
        if self.report_errors {
            vec![ManagerEvent::ErrorOccurred(err)]
        } else {
            Vec::new()
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|slot| slot.id)
    }

    pub fn session_state(&self) -> Option<ConnectionState> {
        self.session.as_ref().map(|slot| slot.machine.state())
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.session
            .as_ref()
            .map(|slot| slot.remotes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        self.discovered.snapshot()
    }

    pub fn connected_players(&self) -> HashMap<PeerIdentity, Player> {
        self.players.snapshot()
    }
}
