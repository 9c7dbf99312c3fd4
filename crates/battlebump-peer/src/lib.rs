//! battlebump-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! - **`application`** – Pure session-manager logic: directories, the
//!   session state machine, and the coordinator that turns transport events
//!   into outward notifications.  No sockets, no tasks.
//! - **`infrastructure`** – UDP discovery, TCP sessions, the async
//!   [`PeerManager`] façade, and TOML configuration.

pub mod application;
pub mod infrastructure;

pub use application::coordinator::{ManagerEvent, SessionId};
pub use application::error::{PeerError, TransmitError};
pub use infrastructure::manager::{ManagerConfig, PeerManager};
