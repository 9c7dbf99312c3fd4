//! Infrastructure layer of the peer.
//!
//! Contains the OS-facing adapters: UDP discovery and TCP session sockets,
//! the async [`manager::PeerManager`] that owns them, and config storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `battlebump_core`, but MUST NOT be imported by the `application` layer.

pub mod manager;
pub mod network;
pub mod storage;
