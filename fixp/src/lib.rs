/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP
//!
//! A FIXP session-layer protocol engine for Rust.
//!
//! FIXP establishes authenticated, bidirectional message sessions over a
//! pluggable byte-stream transport and enforces one of four delivery
//! contracts per direction: None, Unsequenced, Idempotent, or Recoverable.
//!
//! ## Features
//!
//! - **Reactor dispatch**: Every session advances on one dispatch thread
//! - **Flows**: Sequencing, gap detection, and retransmission per direction
//! - **Liveness**: Keepalives and a peer watchdog driven by reactor timers
//! - **Recovery**: Suspension on transport loss and reattachment with sequence state
//! - **Pass-through**: Application frames are never re-encoded
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixp::prelude::*;
//!
//! let engine = Engine::builder().build()?;
//! engine.open()?;
//! let session = engine.initiate(
//!     transport,
//!     |frame: &[u8], _: &FixpSession, seq: u64| println!("{seq}: {} bytes", frame.len()),
//!     SessionConfig::new(FlowType::Recoverable).with_credentials(&b"User1"[..]),
//! )?;
//! session.ready()?.wait(Duration::from_secs(5))?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Identity, fault, and wire types plus error definitions
//! - [`reactor`]: Topic-keyed event dispatch and timers
//! - [`transport`]: Transport capability traits, codec, and in-memory transport
//! - [`session`]: Session state machine, flows, and completions
//! - [`engine`]: High-level engine facade

pub mod core {
    //! Identity, fault, and wire types plus error definitions.
    pub use fixp_core::*;
}

pub mod reactor {
    //! Topic-keyed event dispatch and timers.
    pub use fixp_reactor::*;
}

pub mod transport {
    //! Transport capability traits, codec, and in-memory transport.
    pub use fixp_transport::*;
}

pub mod session {
    //! Session state machine, flows, and completions.
    pub use fixp_session::*;
}

pub mod engine {
    //! High-level engine facade.
    pub use fixp_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use fixp_core::{
        FaultKind, FixpError, FlowType, NotAppliedRange, Result, SessionError, SessionFault,
        SessionId, TerminationCode, encode_application_frame,
    };

    // Reactor
    pub use fixp_reactor::{Event, EventKind, EventReactor, Payload, Topic};

    // Transport
    pub use fixp_transport::{
        BufferSupplier, MemoryTransport, PooledBufferSupplier, Transport, TransportConsumer,
    };

    // Session
    pub use fixp_session::{
        AuthOutcome, Authenticator, FixpSession, MessageConsumer, NoOpConsumer, SessionConfig,
        SessionState, SimpleDirectory,
    };

    // Engine
    pub use fixp_engine::{Engine, EngineBuilder};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let id = SessionId::generate();
        let topic = Topic::new(id, EventKind::SessionReady);
        assert_eq!(topic.session_id(), id);
        assert_eq!(SessionConfig::default().outbound_flow, FlowType::Idempotent);
        assert_eq!(SessionState::default(), SessionState::Unestablished);
    }

    #[test]
    fn test_engine_from_prelude() {
        let directory = std::sync::Arc::new(SimpleDirectory::new());
        directory.add(&b"User1"[..]);
        let engine = Engine::builder().with_directory(directory).build().unwrap();
        assert!(!engine.reactor().is_open());
    }
}
