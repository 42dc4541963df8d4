/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Core types for FIXP session operations.
//!
//! This module provides fundamental types used throughout the engine:
//! - [`SessionId`]: 128-bit session identifier
//! - [`FlowType`]: Delivery contract of one direction of a session
//! - [`TerminationCode`]: Reason code carried by a Terminate message
//! - [`SessionFault`]: Fault description published with session events
//! - [`NotAppliedRange`]: Range of sequence numbers that were not applied

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of an encoded session identifier in bytes.
pub const SESSION_ID_LEN: usize = 16;

/// Globally unique session identifier.
///
/// Generated by the client when a session is created and echoed by the server
/// during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session identifier from its wire representation.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the wire representation of this identifier.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        self.0.as_bytes()
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery contract of one direction of a session.
///
/// Fixed for the lifetime of a session once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum FlowType {
    /// No application messages are sent; heartbeats only.
    None = 0,
    /// Messages are delivered without sequence numbers.
    Unsequenced = 1,
    /// Messages are sequenced but may be delivered out of order or twice.
    #[default]
    Idempotent = 2,
    /// Messages are sequenced and gaps are recovered.
    Recoverable = 3,
}

impl FlowType {
    /// All flow types, in wire order.
    pub const ALL: [FlowType; 4] = [
        FlowType::None,
        FlowType::Unsequenced,
        FlowType::Idempotent,
        FlowType::Recoverable,
    ];

    /// Returns the wire code of this flow.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns true if application messages of this flow carry sequence numbers.
    #[inline]
    #[must_use]
    pub const fn is_sequenced(self) -> bool {
        matches!(self, Self::Idempotent | Self::Recoverable)
    }

    /// Returns the flow name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Unsequenced => "Unsequenced",
            Self::Idempotent => "Idempotent",
            Self::Recoverable => "Recoverable",
        }
    }
}

impl TryFrom<u8> for FlowType {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Unsequenced),
            2 => Ok(Self::Idempotent),
            3 => Ok(Self::Recoverable),
            other => Err(DecodeError::UnsupportedFlow(other)),
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code carried by a Terminate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationCode {
    /// Normal end of session.
    Finished,
    /// Credentials were rejected.
    Unauthorized,
    /// Requested flow is not accepted.
    UnsupportedFlow,
    /// Peer violated the session protocol.
    ProtocolViolation,
    /// Peer sequence number regressed on re-establishment.
    SequenceRegression,
    /// Any other code.
    Unspecified(u8),
}

impl TerminationCode {
    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Finished => 0,
            Self::Unauthorized => 1,
            Self::UnsupportedFlow => 2,
            Self::ProtocolViolation => 3,
            Self::SequenceRegression => 4,
            Self::Unspecified(code) => code,
        }
    }

    /// Returns the fault kind a peer-issued termination with this code maps to.
    #[must_use]
    pub const fn fault_kind(self) -> FaultKind {
        match self {
            Self::Unauthorized => FaultKind::Authentication,
            _ => FaultKind::ProtocolViolation,
        }
    }
}

impl From<u8> for TerminationCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Finished,
            1 => Self::Unauthorized,
            2 => Self::UnsupportedFlow,
            3 => Self::ProtocolViolation,
            4 => Self::SequenceRegression,
            other => Self::Unspecified(other),
        }
    }
}

impl fmt::Display for TerminationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::UnsupportedFlow => f.write_str("unsupported flow"),
            Self::ProtocolViolation => f.write_str("protocol violation"),
            Self::SequenceRegression => f.write_str("sequence regression"),
            Self::Unspecified(code) => write!(f, "unspecified({code})"),
        }
    }
}

/// Classification of session faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// I/O error or disconnect. Recoverable by re-establishment.
    Transport,
    /// Malformed handshake, unsupported flow, or sequence regression. Fatal.
    ProtocolViolation,
    /// Credentials rejected during negotiation. Fatal.
    Authentication,
    /// Peer silent beyond the watchdog interval. Handled like a transport fault.
    HeartbeatTimeout,
    /// A reactor handler failed.
    Handler,
}

impl FaultKind {
    /// Returns true if a session survives this fault in the Suspended state.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Transport | Self::HeartbeatTimeout)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport fault",
            Self::ProtocolViolation => "protocol violation",
            Self::Authentication => "authentication failure",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Handler => "handler fault",
        })
    }
}

/// Fault published with suspension and termination events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFault {
    /// Fault classification.
    pub kind: FaultKind,
    /// Termination code, when the fault ended the session with one.
    pub code: Option<TerminationCode>,
    /// Human-readable detail.
    pub detail: String,
}

impl SessionFault {
    /// Creates a new fault without a termination code.
    #[must_use]
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            detail: detail.into(),
        }
    }

    /// Attaches a termination code.
    #[must_use]
    pub const fn with_code(mut self, code: TerminationCode) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Which side of the session a not-applied range refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Messages this session failed to receive.
    Inbound,
    /// Messages the peer reports it failed to receive from this session.
    Outbound,
}

/// Inclusive range of sequence numbers that were not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotAppliedRange {
    /// First missing sequence number.
    pub from: u64,
    /// Last missing sequence number (inclusive).
    pub to: u64,
    /// Side of the session the range refers to.
    pub direction: Direction,
}

impl NotAppliedRange {
    /// Creates an inbound range `[from, to]`.
    #[must_use]
    pub const fn inbound(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            direction: Direction::Inbound,
        }
    }

    /// Creates an outbound range `[from, to]`.
    #[must_use]
    pub const fn outbound(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            direction: Direction::Outbound,
        }
    }

    /// Returns the number of sequence numbers in the range.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.to - self.from + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_bytes() {
        let id = SessionId::generate();
        let copy = SessionId::from_bytes(*id.as_bytes());
        assert_eq!(id, copy);
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_flow_type_codes() {
        for flow in FlowType::ALL {
            assert_eq!(FlowType::try_from(flow.code()).unwrap(), flow);
        }
        assert_eq!(FlowType::try_from(9), Err(DecodeError::UnsupportedFlow(9)));
        assert!(FlowType::Recoverable.is_sequenced());
        assert!(!FlowType::Unsequenced.is_sequenced());
    }

    #[test]
    fn test_termination_code_mapping() {
        assert_eq!(TerminationCode::from(1), TerminationCode::Unauthorized);
        assert_eq!(TerminationCode::from(77), TerminationCode::Unspecified(77));
        assert_eq!(
            TerminationCode::Unauthorized.fault_kind(),
            FaultKind::Authentication
        );
        assert_eq!(
            TerminationCode::SequenceRegression.fault_kind(),
            FaultKind::ProtocolViolation
        );
    }

    #[test]
    fn test_fault_recoverability() {
        assert!(FaultKind::Transport.is_recoverable());
        assert!(FaultKind::HeartbeatTimeout.is_recoverable());
        assert!(!FaultKind::Authentication.is_recoverable());
    }

    #[test]
    fn test_not_applied_range_count() {
        let range = NotAppliedRange::inbound(6, 7);
        assert_eq!(range.count(), 2);
        assert_eq!(range.direction, Direction::Inbound);
    }
}
