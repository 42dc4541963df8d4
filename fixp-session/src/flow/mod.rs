/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Per-direction flow behavior.
//!
//! A session owns at most one [`FlowSender`] and one [`FlowReceiver`] at a
//! time. Each is built for the flow of its own direction: the sender for the
//! session's configured outbound flow, the receiver for the flow the peer
//! declared during the handshake.

pub mod receiver;
pub mod sender;

pub use receiver::{FlowReceiver, Inbound};
pub use sender::FlowSender;
