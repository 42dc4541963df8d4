/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Outbound half of a flow.
//!
//! | Flow | `send` | keepalive frame |
//! |---|---|---|
//! | None | no write, returns 0 | UnsequencedHeartbeat |
//! | Unsequenced | write, returns 0 | UnsequencedHeartbeat |
//! | Idempotent | write, returns sequence number | Sequence |
//! | Recoverable | write, returns sequence number | Sequence |
//!
//! Sequenced senders precede the first application frame after establishment,
//! and after every retransmission, with a `Sequence` frame so the peer can
//! number the frames that follow.

use crate::heartbeat::HeartbeatDue;
use crate::sequence::Sequencer;
use bytes::Bytes;
use fixp_core::error::{ReactorError, SessionError};
use fixp_core::frame::SessionMessage;
use fixp_core::types::{FaultKind, FlowType, SessionFault, SessionId};
use fixp_reactor::{EventKind, EventReactor, Payload, Subscription, TimerSchedule, Topic};
use fixp_transport::Transport;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

struct SenderCore {
    session_id: SessionId,
    flow: FlowType,
    transport: Arc<dyn Transport>,
    sequencer: Arc<Sequencer>,
    reactor: EventReactor,
    heartbeat: HeartbeatDue,
    needs_sequence: bool,
    finished: bool,
    faulted: bool,
}

impl SenderCore {
    fn write(&mut self, frame: &[u8]) -> bool {
        match self.transport.write(frame) {
            Ok(_) => {
                self.heartbeat.clear();
                true
            }
            Err(err) => {
                self.report_fault(&err.to_string());
                false
            }
        }
    }

    fn write_control(&mut self, message: &SessionMessage) -> bool {
        match message.encode() {
            Ok(frame) => self.write(&frame),
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "control frame not encoded");
                false
            }
        }
    }

    fn report_fault(&mut self, detail: &str) {
        if self.faulted {
            return;
        }
        self.faulted = true;
        warn!(session_id = %self.session_id, flow = %self.flow, "transport write failed: {detail}");
        let fault = SessionFault::new(FaultKind::Transport, detail);
        let topic = Topic::new(self.session_id, EventKind::SessionSuspended);
        if let Err(err) = self.reactor.post(topic, Payload::Fault(fault)) {
            debug!(session_id = %self.session_id, error = %err, "suspension not posted");
        }
    }

    fn keepalive_frame(&self) -> SessionMessage {
        if self.flow.is_sequenced() {
            SessionMessage::Sequence {
                next_seq: self.sequencer.last_outbound() + 1,
            }
        } else {
            SessionMessage::UnsequencedHeartbeat
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<u64, SessionError> {
        if self.finished {
            return Err(SessionError::StreamFinished(self.session_id));
        }
        match self.flow {
            FlowType::None => Ok(0),
            FlowType::Unsequenced => {
                self.write(frame);
                Ok(0)
            }
            FlowType::Idempotent | FlowType::Recoverable => {
                if self.needs_sequence {
                    let announce = SessionMessage::Sequence {
                        next_seq: self.sequencer.last_outbound() + 1,
                    };
                    if self.write_control(&announce) {
                        self.needs_sequence = false;
                    }
                }
                let seq = self.sequencer.next_outbound();
                self.write(frame);
                trace!(session_id = %self.session_id, seq, "frame sent");
                Ok(seq)
            }
        }
    }

    fn send_heartbeat(&mut self) -> bool {
        if self.finished || !self.heartbeat.is_due() {
            return false;
        }
        let frame = self.keepalive_frame();
        let written = self.write_control(&frame);
        if written && matches!(frame, SessionMessage::Sequence { .. }) {
            self.needs_sequence = false;
        }
        written
    }

    fn tick(&mut self) {
        self.send_heartbeat();
        self.heartbeat.arm();
    }
}

/// Outbound flow of an established session.
///
/// Stops its keepalive timer when dropped.
pub struct FlowSender {
    core: Arc<Mutex<SenderCore>>,
    keepalive: Mutex<Option<(Subscription, TimerSchedule)>>,
}

impl FlowSender {
    /// Creates a sender writing to `transport`.
    ///
    /// # Arguments
    /// * `flow` - Flow of this direction
    /// * `session_id` - Session the sender belongs to
    /// * `transport` - Transport frames are written to
    /// * `sequencer` - Sequencer shared with the session
    /// * `reactor` - Reactor owning the session
    #[must_use]
    pub fn new(
        flow: FlowType,
        session_id: SessionId,
        transport: Arc<dyn Transport>,
        sequencer: Arc<Sequencer>,
        reactor: EventReactor,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(SenderCore {
                session_id,
                flow,
                transport,
                sequencer,
                reactor,
                heartbeat: HeartbeatDue::new(),
                needs_sequence: flow.is_sequenced(),
                finished: false,
                faulted: false,
            })),
            keepalive: Mutex::new(None),
        }
    }

    /// Starts writing keepalives every `interval`. A zero interval disables
    /// them.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed.
    pub fn start_keepalive(&self, interval: Duration) -> Result<(), ReactorError> {
        if interval.is_zero() {
            return Ok(());
        }
        let (reactor, topic) = {
            let core = self.core.lock();
            (
                core.reactor.clone(),
                Topic::new(core.session_id, EventKind::Heartbeat),
            )
        };

        let weak: Weak<Mutex<SenderCore>> = Arc::downgrade(&self.core);
        let subscription = reactor.subscribe(topic, move |_| {
            if let Some(core) = weak.upgrade() {
                core.lock().tick();
            }
            Ok(())
        })?;
        let timer = match reactor.post_at_interval(topic, Payload::Empty, interval) {
            Ok(timer) => timer,
            Err(err) => {
                subscription.unsubscribe();
                return Err(err);
            }
        };
        if let Some((old_sub, old_timer)) = self.keepalive.lock().replace((subscription, timer)) {
            old_sub.unsubscribe();
            old_timer.cancel();
        }
        Ok(())
    }

    /// Stops the keepalive timer.
    pub fn stop(&self) {
        if let Some((subscription, timer)) = self.keepalive.lock().take() {
            timer.cancel();
            subscription.unsubscribe();
        }
    }

    /// Sends one application frame.
    ///
    /// Returns the assigned sequence number, or 0 for unsequenced flows. A
    /// transport failure does not fail the call; it is published as
    /// `SESSION_SUSPENDED` and the number stays assigned.
    ///
    /// # Errors
    /// Returns `SessionError::StreamFinished` after end of stream.
    pub fn send(&self, frame: &[u8]) -> Result<u64, SessionError> {
        self.core.lock().send(frame)
    }

    /// Writes a keepalive if no traffic went out since the flag was armed.
    ///
    /// Returns true if a frame was written.
    pub fn send_heartbeat(&self) -> bool {
        self.core.lock().send_heartbeat()
    }

    /// Runs one keepalive cycle: writes a keepalive if due, then re-arms.
    pub fn tick(&self) {
        self.core.lock().tick();
    }

    /// Writes the end-of-stream marker and refuses further sends.
    ///
    /// Returns true if the marker reached the transport.
    ///
    /// # Errors
    /// Returns `SessionError::StreamFinished` if already called.
    pub fn send_end_of_stream(&self) -> Result<bool, SessionError> {
        let written = {
            let mut core = self.core.lock();
            if core.finished {
                return Err(SessionError::StreamFinished(core.session_id));
            }
            let marker = SessionMessage::FinishedSending {
                last_seq: core.sequencer.last_outbound(),
            };
            let written = core.write_control(&marker);
            core.finished = true;
            written
        };
        self.stop();
        Ok(written)
    }

    /// Resends stored frames starting at `first_seq`.
    ///
    /// Writes a `Retransmission` frame followed by `frames`, whose sequence
    /// numbers are `first_seq..first_seq + frames.len()`.
    ///
    /// # Errors
    /// Returns `SessionError::UnsupportedByFlow` unless the flow is
    /// Recoverable, or `SessionError::StreamFinished` after end of stream.
    pub fn retransmit(&self, first_seq: u64, frames: &[Bytes]) -> Result<(), SessionError> {
        let mut core = self.core.lock();
        if core.flow != FlowType::Recoverable {
            return Err(SessionError::UnsupportedByFlow {
                flow: core.flow.to_string(),
            });
        }
        if core.finished {
            return Err(SessionError::StreamFinished(core.session_id));
        }
        let count = u32::try_from(frames.len()).unwrap_or(u32::MAX);
        let header = SessionMessage::Retransmission {
            next_seq: first_seq,
            count,
        };
        if !core.write_control(&header) {
            return Ok(());
        }
        for frame in frames.iter().take(count as usize) {
            if !core.write(frame) {
                return Ok(());
            }
        }
        core.needs_sequence = true;
        debug!(session_id = %core.session_id, first_seq, count, "frames retransmitted");
        Ok(())
    }

    /// Returns the flow.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.core.lock().flow
    }

    /// Returns true after end of stream.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.lock().finished
    }

    /// Returns true once a transport write has failed.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.core.lock().faulted
    }
}

impl fmt::Debug for FlowSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("FlowSender")
            .field("session_id", &core.session_id)
            .field("flow", &core.flow)
            .field("finished", &core.finished)
            .finish()
    }
}

impl Drop for FlowSender {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use crossbeam_channel::bounded;
    use fixp_core::frame::encode_application_frame;

    fn sender(flow: FlowType) -> (FlowSender, Arc<RecordingTransport>, EventReactor) {
        let reactor = EventReactor::new();
        let transport = Arc::new(RecordingTransport::new());
        let sender = FlowSender::new(
            flow,
            SessionId::generate(),
            transport.clone(),
            Arc::new(Sequencer::new()),
            reactor.clone(),
        );
        (sender, transport, reactor)
    }

    fn frame(len: usize) -> Bytes {
        encode_application_frame(1, 100, 1, &vec![7u8; len]).unwrap()
    }

    #[test]
    fn test_none_sender_never_writes_application_frames() {
        let (sender, transport, _reactor) = sender(FlowType::None);
        for n in 0..5 {
            assert_eq!(sender.send(&frame(n)).unwrap(), 0);
        }
        assert_eq!(transport.written().len(), 0);
    }

    #[test]
    fn test_none_sender_heartbeat_once_per_cycle() {
        let (sender, transport, _reactor) = sender(FlowType::None);
        assert!(sender.send_heartbeat());
        assert!(!sender.send_heartbeat());
        sender.tick();
        assert_eq!(transport.written().len(), 1);

        sender.tick();
        let written = transport.written();
        assert_eq!(written.len(), 2);
        assert_eq!(
            SessionMessage::decode(&written[1]).unwrap(),
            SessionMessage::UnsequencedHeartbeat
        );
    }

    #[test]
    fn test_unsequenced_send_clears_heartbeat() {
        let (sender, transport, _reactor) = sender(FlowType::Unsequenced);
        assert_eq!(sender.send(&frame(3)).unwrap(), 0);
        assert!(!sender.send_heartbeat());
        assert_eq!(transport.written().len(), 1);
    }

    #[test]
    fn test_recoverable_sequence_numbers() {
        let (sender, transport, _reactor) = sender(FlowType::Recoverable);
        let seqs: Vec<u64> = (0..10).map(|n| sender.send(&frame(n)).unwrap()).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());

        let written = transport.written();
        assert_eq!(written.len(), 11);
        assert_eq!(
            SessionMessage::decode(&written[0]).unwrap(),
            SessionMessage::Sequence { next_seq: 1 }
        );
    }

    #[test]
    fn test_sequenced_keepalive_announces_next_number() {
        let (sender, transport, _reactor) = sender(FlowType::Idempotent);
        sender.send(&frame(1)).unwrap();
        sender.tick();
        sender.tick();
        let written = transport.written();
        assert_eq!(
            SessionMessage::decode(written.last().unwrap()).unwrap(),
            SessionMessage::Sequence { next_seq: 2 }
        );
    }

    #[test]
    fn test_end_of_stream_disables_sends() {
        let (sender, transport, _reactor) = sender(FlowType::Recoverable);
        sender.send(&frame(1)).unwrap();
        sender.send(&frame(1)).unwrap();
        assert!(sender.send_end_of_stream().unwrap());

        assert!(matches!(
            sender.send(&frame(1)),
            Err(SessionError::StreamFinished(_))
        ));
        assert!(sender.send_end_of_stream().is_err());
        assert_eq!(
            SessionMessage::decode(transport.written().last().unwrap()).unwrap(),
            SessionMessage::FinishedSending { last_seq: 2 }
        );
    }

    #[test]
    fn test_write_failure_posts_suspension_once() {
        let (sender, transport, reactor) = sender(FlowType::Recoverable);
        let session_id = sender.core.lock().session_id;
        let (tx, rx) = bounded(4);
        reactor
            .subscribe(Topic::new(session_id, EventKind::SessionSuspended), move |event| {
                tx.send(event.payload.clone()).unwrap();
                Ok(())
            })
            .unwrap();
        reactor.open().unwrap();

        transport.fail_writes();
        assert_eq!(sender.send(&frame(1)).unwrap(), 1);
        assert_eq!(sender.send(&frame(1)).unwrap(), 2);
        assert!(sender.is_faulted());

        let payload = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(payload, Payload::Fault(ref f) if f.kind == FaultKind::Transport));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        reactor.close();
    }

    #[test]
    fn test_retransmit_requires_recoverable() {
        let (sender, _transport, _reactor) = sender(FlowType::Idempotent);
        assert!(matches!(
            sender.retransmit(1, &[frame(1)]),
            Err(SessionError::UnsupportedByFlow { .. })
        ));
    }

    #[test]
    fn test_retransmit_then_resequence() {
        let (sender, transport, _reactor) = sender(FlowType::Recoverable);
        let stored: Vec<Bytes> = (0..3).map(frame).collect();
        for f in &stored {
            sender.send(f).unwrap();
        }
        sender.retransmit(2, &stored[1..]).unwrap();
        assert_eq!(sender.send(&frame(9)).unwrap(), 4);

        let written = transport.written();
        assert_eq!(
            SessionMessage::decode(&written[4]).unwrap(),
            SessionMessage::Retransmission {
                next_seq: 2,
                count: 2
            }
        );
        assert_eq!(
            SessionMessage::decode(&written[7]).unwrap(),
            SessionMessage::Sequence { next_seq: 4 }
        );
    }

    #[test]
    fn test_keepalive_timer_writes_heartbeats() {
        let (sender, transport, reactor) = sender(FlowType::Unsequenced);
        reactor.open().unwrap();
        sender.start_keepalive(Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        sender.stop();
        std::thread::sleep(Duration::from_millis(20));
        let count = transport.written().len();
        assert!(count >= 2, "expected periodic heartbeats, got {count}");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.written().len(), count);
        reactor.close();
    }
}
