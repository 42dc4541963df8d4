/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Application message callback.

use crate::session::FixpSession;

/// Receives inbound application frames.
///
/// Called on the session's reactor thread, in delivery order. The sequence
/// number is zero for unsequenced flows.
pub trait MessageConsumer: Send + Sync {
    /// Handles one inbound application frame, header included.
    fn accept(&self, frame: &[u8], session: &FixpSession, seq: u64);
}

impl<F> MessageConsumer for F
where
    F: Fn(&[u8], &FixpSession, u64) + Send + Sync,
{
    fn accept(&self, frame: &[u8], session: &FixpSession, seq: u64) {
        self(frame, session, seq);
    }
}

/// Consumer that discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpConsumer;

impl MessageConsumer for NoOpConsumer {
    fn accept(&self, _frame: &[u8], _session: &FixpSession, _seq: u64) {}
}
