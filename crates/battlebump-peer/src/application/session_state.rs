//! Connection state machine of a single session.
//!
//! ```text
//!              ┌──────────► Connected ──────┐
//!  (created) ─► Connecting                  ├──► NotConnected (terminal)
//!              └────────────────────────────┘
//! ```
//!
//! A session exists from the moment an invitation is sent or accepted, so it
//! starts out `Connecting`.  The transport still reports `Connecting`
//! explicitly once; that first report is what the UI is told about.  After
//! `NotConnected` nothing more is accepted; reconnecting needs a new session.

use battlebump_core::ConnectionState;
use thiserror::Error;

/// A transition the state machine refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Tracks one session's [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: ConnectionState,
    connecting_reported: bool,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            connecting_reported: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a transport-reported state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for a repeated `Connecting` report, any
    /// move backwards, or anything after `NotConnected`.
    pub fn apply(&mut self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;

        let allowed = match (self.state, to) {
            (Connecting, Connecting) => !self.connecting_reported,
            (Connecting, Connected) | (Connecting, NotConnected) | (Connected, NotConnected) => true,
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }

        if to == Connecting {
            self.connecting_reported = true;
        }
        self.state = to;
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_new_machine_is_connecting() {
        assert_eq!(SessionStateMachine::new().state(), Connecting);
    }

    #[test]
    fn test_happy_path_connecting_connected_not_connected() {
        // Arrange
        let mut fsm = SessionStateMachine::new();

        // Act / Assert
        assert_eq!(fsm.apply(Connecting), Ok(Connecting));
        assert_eq!(fsm.apply(Connected), Ok(Connected));
        assert!(fsm.is_connected());
        assert_eq!(fsm.apply(NotConnected), Ok(NotConnected));
        assert!(fsm.is_terminal());
    }

    #[test]
    fn test_connecting_can_fail_directly() {
        let mut fsm = SessionStateMachine::new();
        fsm.apply(Connecting).unwrap();
        assert_eq!(fsm.apply(NotConnected), Ok(NotConnected));
    }

    #[test]
    fn test_failure_before_connecting_report_is_accepted() {
        // Connect attempts can fail before the transport says anything.
        let mut fsm = SessionStateMachine::new();
        assert_eq!(fsm.apply(NotConnected), Ok(NotConnected));
    }

    #[test]
    fn test_duplicate_connecting_report_is_rejected() {
        let mut fsm = SessionStateMachine::new();
        fsm.apply(Connecting).unwrap();
        assert_eq!(
            fsm.apply(Connecting),
            Err(InvalidTransition { from: Connecting, to: Connecting })
        );
    }

    #[test]
    fn test_connected_cannot_go_back_to_connecting() {
        let mut fsm = SessionStateMachine::new();
        fsm.apply(Connected).unwrap();
        assert!(fsm.apply(Connecting).is_err());
        assert_eq!(fsm.state(), Connected);
    }

    #[test]
    fn test_not_connected_is_terminal() {
        let mut fsm = SessionStateMachine::new();
        fsm.apply(NotConnected).unwrap();
        for to in [Connecting, Connected, NotConnected] {
            assert!(fsm.apply(to).is_err(), "{to:?} must be rejected");
        }
    }
}
