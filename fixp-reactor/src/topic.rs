/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Typed event addressing.
//!
//! A [`Topic`] pairs a [`SessionId`] with an [`EventKind`]. Topics are
//! process-local and never appear on the wire.

use bytes::Bytes;
use fixp_core::types::{NotAppliedRange, SessionFault, SessionId};
use std::fmt;

/// Kind of event published for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Outbound keepalive timer tick.
    Heartbeat,
    /// Inbound watchdog timer tick.
    PeerHeartbeat,
    /// Peer went silent or terminated the session.
    PeerTerminated,
    /// Session lost its transport and is suspended.
    SessionSuspended,
    /// Session reached the Terminated state.
    SessionTerminated,
    /// Session reached the Established state.
    SessionReady,
    /// A range of sequence numbers was not applied.
    NotApplied,
    /// Transport reported a connection.
    TransportConnected,
    /// Transport delivered an inbound frame.
    FrameReceived,
    /// Transport reported a disconnect.
    TransportDisconnected,
}

impl EventKind {
    /// Returns the event kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::PeerHeartbeat => "PEER_HEARTBEAT",
            Self::PeerTerminated => "PEER_TERMINATED",
            Self::SessionSuspended => "SESSION_SUSPENDED",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::SessionReady => "SESSION_READY",
            Self::NotApplied => "NOT_APPLIED",
            Self::TransportConnected => "TRANSPORT_CONNECTED",
            Self::FrameReceived => "FRAME_RECEIVED",
            Self::TransportDisconnected => "TRANSPORT_DISCONNECTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of an event: a session and an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    session_id: SessionId,
    kind: EventKind,
}

impl Topic {
    /// Creates a topic.
    #[inline]
    #[must_use]
    pub const fn new(session_id: SessionId, kind: EventKind) -> Self {
        Self { session_id, kind }
    }

    /// Returns the session this topic belongs to.
    #[inline]
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the event kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.kind)
    }
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// No payload.
    #[default]
    Empty,
    /// Connection state change of the transport with the given generation.
    Link {
        /// Transport generation that produced the event.
        generation: u64,
    },
    /// Inbound frame from the transport with the given generation.
    Frame {
        /// Transport generation that produced the frame.
        generation: u64,
        /// Complete frame including its header.
        frame: Bytes,
    },
    /// Session became ready.
    Ready(SessionId),
    /// Session ended without a fault.
    Closed,
    /// Fault that suspended or terminated the session.
    Fault(SessionFault),
    /// Range of sequence numbers that were not applied.
    NotApplied(NotAppliedRange),
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Topic the event was posted to.
    pub topic: Topic,
    /// Event payload.
    pub payload: Payload,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub const fn new(topic: Topic, payload: Payload) -> Self {
        Self { topic, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_identity() {
        let id = SessionId::generate();
        let ready = Topic::new(id, EventKind::SessionReady);
        assert_eq!(ready, Topic::new(id, EventKind::SessionReady));
        assert_ne!(ready, Topic::new(id, EventKind::SessionTerminated));
        assert_ne!(
            ready,
            Topic::new(SessionId::generate(), EventKind::SessionReady)
        );

        let set: HashSet<Topic> = [ready, ready].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_topic_display() {
        let id = SessionId::generate();
        let topic = Topic::new(id, EventKind::PeerTerminated);
        assert_eq!(topic.to_string(), format!("{id}/PEER_TERMINATED"));
    }
}
