/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Session lifecycle states.
//!
//! Transitions:
//! - `Unestablished -> Negotiating` when the transport connects
//! - `Negotiating -> Established` on a successful handshake
//! - `Established -> Suspended` on a transport fault or peer silence
//! - `Suspended -> Negotiating` when a new transport connects
//! - any state `-> Terminated` on close or a fatal fault

use std::fmt;

/// Runtime state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, transport not yet connected.
    #[default]
    Unestablished,
    /// Handshake in progress.
    Negotiating,
    /// Handshake complete; application messages flow.
    Established,
    /// Transport lost; sequence state retained for re-establishment.
    Suspended,
    /// Session ended. Terminal.
    Terminated,
}

impl SessionState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unestablished => "Unestablished",
            Self::Negotiating => "Negotiating",
            Self::Established => "Established",
            Self::Suspended => "Suspended",
            Self::Terminated => "Terminated",
        }
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true while the session holds a live transport.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Negotiating | Self::Established)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiator; sends Negotiate.
    Client,
    /// Acceptor; authenticates and answers with Establish.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(SessionState::default(), SessionState::Unestablished);
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Terminated.is_terminal());
        assert!(SessionState::Established.is_connected());
        assert!(!SessionState::Suspended.is_connected());
        assert_eq!(SessionState::Negotiating.to_string(), "Negotiating");
    }
}
