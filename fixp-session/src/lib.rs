/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP Session
//!
//! FIXP session layer for the FIXP engine.
//!
//! This crate provides:
//! - **State machine**: Negotiate/Establish handshake, suspension, and termination
//! - **Flows**: Per-direction senders and receivers for the four delivery contracts
//! - **Sequence management**: Atomic outbound assignment and inbound validation
//! - **Heartbeat handling**: Keepalive scheduling and peer liveness watchdog
//! - **Completions**: Ready and terminated notifications, blocking or async
//! - **Authentication**: Pluggable credential checks with an in-memory directory

pub mod auth;
pub mod completion;
pub mod config;
pub mod consumer;
pub mod flow;
pub mod heartbeat;
pub mod sequence;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use auth::{AuthOutcome, Authenticator, DirectoryAuthenticator, SimpleDirectory};
pub use completion::{SessionReadyFuture, SessionTerminatedFuture};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use consumer::{MessageConsumer, NoOpConsumer};
pub use flow::{FlowReceiver, FlowSender, Inbound};
pub use heartbeat::HeartbeatDue;
pub use sequence::{SequenceState, SequenceValidation, Sequencer};
pub use session::{FixpSession, FixpSessionBuilder};
pub use state::{Role, SessionState};
