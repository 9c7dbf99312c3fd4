//! Application layer of the peer: the session manager's logic with every
//! socket abstracted away.
//!
//! **Dependency rule**: this layer depends on `battlebump_core` only.  The
//! infrastructure layer feeds it transport events and executes what it
//! decides; nothing here spawns tasks or touches the network.
//!
//! # Sub-modules
//!
//! - **`directory`** – The discovered-peer directory (with advertised
//!   moveset names) and the connected-player directory.
//! - **`session_state`** – The per-session connection state machine.
//! - **`coordinator`** – Owns both directories and the single session slot;
//!   turns transport events into outward [`coordinator::ManagerEvent`]s.
//! - **`error`** – The error taxonomy shared with the infrastructure layer.

pub mod coordinator;
pub mod directory;
pub mod error;
pub mod session_state;
