/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Inbound half of a flow.
//!
//! Application frames carry no sequence number on the wire. The receiver
//! numbers them implicitly: `Sequence` and `Retransmission` frames set the
//! number of the next application frame and each application frame consumes
//! one.
//!
//! A recoverable receiver buffers frames that arrive past a gap until the gap
//! is filled, reporting each missing range once as `NOT_APPLIED` locally and
//! as a `NotApplied` frame to the peer. Frames dropped because the buffer is
//! full are reported again with the next gap.

use crate::heartbeat::HeartbeatDue;
use crate::sequence::{SequenceValidation, Sequencer};
use bytes::Bytes;
use fixp_core::error::{ReactorError, SessionError};
use fixp_core::frame::SessionMessage;
use fixp_core::types::{FaultKind, FlowType, NotAppliedRange, SessionFault, SessionId};
use fixp_reactor::{EventKind, EventReactor, Payload, Subscription, TimerSchedule, Topic};
use fixp_transport::Transport;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Frames released by one inbound application frame.
#[derive(Debug, Default)]
pub struct Inbound {
    /// Frames to deliver, in order, with their sequence numbers.
    pub deliveries: SmallVec<[(u64, Bytes); 1]>,
    /// Missing range detected by this frame.
    pub gap: Option<NotAppliedRange>,
}

struct ReceiverCore {
    session_id: SessionId,
    flow: FlowType,
    transport: Arc<dyn Transport>,
    sequencer: Arc<Sequencer>,
    reactor: EventReactor,
    heartbeat: HeartbeatDue,
    next_implicit: u64,
    highest_seen: u64,
    max_buffered: usize,
    buffered: BTreeMap<u64, Bytes>,
    /// Span of numbers dropped on a full buffer and not yet requested again.
    dropped: Option<(u64, u64)>,
    watchdog: Option<(Subscription, TimerSchedule)>,
    inert: bool,
}

impl ReceiverCore {
    fn report_gap(&mut self, from: u64, to: u64) -> NotAppliedRange {
        let range = NotAppliedRange::inbound(from, to);
        info!(session_id = %self.session_id, from, to, "inbound gap");

        let count = u32::try_from(range.count()).unwrap_or(u32::MAX);
        let frame = SessionMessage::NotApplied {
            from_seq: from,
            count,
        };
        match frame.encode() {
            Ok(bytes) => {
                if let Err(err) = self.transport.write(&bytes) {
                    debug!(session_id = %self.session_id, error = %err, "NotApplied not written");
                }
            }
            Err(err) => warn!(session_id = %self.session_id, error = %err, "NotApplied not encoded"),
        }
        self.dropped = match self.dropped {
            Some((_, hi)) if hi <= to => None,
            Some((lo, hi)) if lo <= to => Some((to + 1, hi)),
            other => other,
        };

        let topic = Topic::new(self.session_id, EventKind::NotApplied);
        if let Err(err) = self.reactor.post(topic, Payload::NotApplied(range)) {
            debug!(session_id = %self.session_id, error = %err, "gap not posted");
        }
        range
    }

    fn on_sequence(&mut self, next_seq: u64) -> Option<NotAppliedRange> {
        self.heartbeat.clear();
        self.next_implicit = next_seq;
        if self.flow != FlowType::Recoverable {
            return None;
        }
        let expected = self.sequencer.last_inbound() + 1;
        let from = self.gap_start(expected);
        if next_seq > from {
            self.highest_seen = next_seq - 1;
            return Some(self.report_gap(from, next_seq - 1));
        }
        None
    }

    /// First number of the next range to report, at or past `expected`.
    fn gap_start(&mut self, expected: u64) -> u64 {
        let mut from = self.highest_seen.saturating_add(1);
        if let Some((lo, hi)) = self.dropped {
            if hi < expected {
                self.dropped = None;
            } else {
                from = from.min(lo);
            }
        }
        from.max(expected)
    }

    fn on_application(&mut self, frame: Bytes) -> Result<Inbound, SessionError> {
        self.heartbeat.clear();
        let mut inbound = Inbound::default();
        match self.flow {
            FlowType::None => {
                debug!(session_id = %self.session_id, "application frame on None flow dropped");
            }
            FlowType::Unsequenced => inbound.deliveries.push((0, frame)),
            FlowType::Idempotent => {
                let seq = self.take_implicit()?;
                self.sequencer.observe_inbound(seq);
                self.highest_seen = self.highest_seen.max(seq);
                inbound.deliveries.push((seq, frame));
            }
            FlowType::Recoverable => {
                let seq = self.take_implicit()?;
                self.accept_recoverable(seq, frame, &mut inbound);
            }
        }
        Ok(inbound)
    }

    fn accept_recoverable(&mut self, seq: u64, frame: Bytes, inbound: &mut Inbound) {
        match self.sequencer.validate(seq) {
            SequenceValidation::InOrder => {
                self.highest_seen = self.highest_seen.max(seq);
                inbound.deliveries.push((seq, frame));
                loop {
                    let next = self.sequencer.last_inbound() + 1;
                    let Some(held) = self.buffered.remove(&next) else {
                        break;
                    };
                    if self.sequencer.validate(next).is_in_order() {
                        inbound.deliveries.push((next, held));
                    }
                }
            }
            SequenceValidation::Duplicate => {
                trace!(session_id = %self.session_id, seq, "duplicate dropped");
            }
            SequenceValidation::Gap { expected, received } => {
                let from = self.gap_start(expected);
                if received > from {
                    inbound.gap = Some(self.report_gap(from, received - 1));
                }
                if self.buffered.contains_key(&seq) {
                    return;
                }
                if self.buffered.len() < self.max_buffered {
                    self.buffered.insert(seq, frame);
                    self.highest_seen = self.highest_seen.max(seq);
                } else {
                    self.highest_seen = self.highest_seen.max(received - 1);
                    self.dropped = Some(match self.dropped {
                        Some((lo, hi)) => (lo.min(seq), hi.max(seq)),
                        None => (seq, seq),
                    });
                    warn!(session_id = %self.session_id, seq, "gap buffer full, frame dropped");
                }
            }
        }
    }

    fn take_implicit(&mut self) -> Result<u64, SessionError> {
        let seq = self.next_implicit;
        self.next_implicit = seq
            .checked_add(1)
            .ok_or(SessionError::SequenceOverflow(seq))?;
        Ok(seq)
    }

    fn check_liveness(&mut self) {
        if self.inert {
            return;
        }
        if !self.heartbeat.is_due() {
            self.heartbeat.arm();
            return;
        }

        self.inert = true;
        if let Some((subscription, timer)) = self.watchdog.take() {
            timer.cancel();
            subscription.unsubscribe();
        }
        let silent = self.heartbeat.since_traffic();
        warn!(session_id = %self.session_id, silent_ms = silent.as_millis() as u64, "peer silent");
        let fault = SessionFault::new(
            FaultKind::HeartbeatTimeout,
            format!("no inbound traffic for {} ms", silent.as_millis()),
        );
        let topic = Topic::new(self.session_id, EventKind::PeerTerminated);
        if let Err(err) = self.reactor.post(topic, Payload::Fault(fault)) {
            debug!(session_id = %self.session_id, error = %err, "peer termination not posted");
        }
    }
}

/// Inbound flow of an established session.
///
/// Stops its watchdog when dropped.
pub struct FlowReceiver {
    core: Arc<Mutex<ReceiverCore>>,
}

impl FlowReceiver {
    /// Creates a receiver for frames the peer sends with `flow`.
    ///
    /// # Arguments
    /// * `flow` - Flow the peer declared for its outbound direction
    /// * `session_id` - Session the receiver belongs to
    /// * `transport` - Transport used to report gaps to the peer
    /// * `sequencer` - Sequencer shared with the session
    /// * `reactor` - Reactor owning the session
    /// * `next_seq` - Number of the peer's next application frame
    /// * `max_buffered` - Bound of the recoverable gap buffer
    #[must_use]
    pub fn new(
        flow: FlowType,
        session_id: SessionId,
        transport: Arc<dyn Transport>,
        sequencer: Arc<Sequencer>,
        reactor: EventReactor,
        next_seq: u64,
        max_buffered: usize,
    ) -> Self {
        let highest_seen = sequencer.last_inbound();
        Self {
            core: Arc::new(Mutex::new(ReceiverCore {
                session_id,
                flow,
                transport,
                sequencer,
                reactor,
                heartbeat: HeartbeatDue::new(),
                next_implicit: next_seq.max(1),
                highest_seen,
                max_buffered,
                buffered: BTreeMap::new(),
                dropped: None,
                watchdog: None,
                inert: false,
            })),
        }
    }

    /// Starts the liveness watchdog.
    ///
    /// Every `interval` the watchdog checks for inbound traffic since its
    /// previous check. Finding none, it posts `PEER_TERMINATED` once, cancels
    /// itself, and the receiver stops watching.
    ///
    /// # Errors
    /// Returns `ReactorError` if the timer cannot be scheduled.
    pub fn start_watchdog(&self, interval: Duration) -> Result<(), ReactorError> {
        let (reactor, topic) = {
            let core = self.core.lock();
            (
                core.reactor.clone(),
                Topic::new(core.session_id, EventKind::PeerHeartbeat),
            )
        };

        let weak: Weak<Mutex<ReceiverCore>> = Arc::downgrade(&self.core);
        let subscription = reactor.subscribe(topic, move |_| {
            if let Some(core) = weak.upgrade() {
                core.lock().check_liveness();
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

        let mut core = self.core.lock();
        if let Some((old_sub, old_timer)) = core.watchdog.replace((subscription, timer)) {
            old_timer.cancel();
            old_sub.unsubscribe();
        }
        core.inert = false;
        Ok(())
    }

    /// Stops the watchdog.
    pub fn stop(&self) {
        let mut core = self.core.lock();
        core.inert = true;
        if let Some((subscription, timer)) = core.watchdog.take() {
            timer.cancel();
            subscription.unsubscribe();
        }
    }

    /// Handles an inbound keepalive without sequence information.
    pub fn on_heartbeat(&self) {
        self.core.lock().heartbeat.clear();
    }

    /// Handles an inbound `Sequence` frame.
    ///
    /// Returns the gap it reveals on a recoverable flow.
    pub fn on_sequence(&self, next_seq: u64) -> Option<NotAppliedRange> {
        self.core.lock().on_sequence(next_seq)
    }

    /// Handles an inbound `Retransmission` frame.
    pub fn on_retransmission(&self, next_seq: u64, count: u32) {
        let mut core = self.core.lock();
        core.heartbeat.clear();
        core.next_implicit = next_seq;
        debug!(session_id = %core.session_id, next_seq, count, "retransmission started");
    }

    /// Handles an inbound application frame.
    ///
    /// # Errors
    /// Returns `SessionError::SequenceOverflow` if the frame's implicit number
    /// has no successor.
    pub fn on_application(&self, frame: Bytes) -> Result<Inbound, SessionError> {
        self.core.lock().on_application(frame)
    }

    /// Runs one watchdog check.
    pub fn check_liveness(&self) {
        self.core.lock().check_liveness();
    }

    /// Returns the peer's flow.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.core.lock().flow
    }

    /// Returns the number of frames held past a gap.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.lock().buffered.len()
    }

    /// Returns the highest sequence number seen, for diagnostics.
    #[must_use]
    pub fn highest_seen(&self) -> u64 {
        self.core.lock().highest_seen
    }

    /// Returns true once the watchdog gave up on the peer or was stopped.
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.core.lock().inert
    }
}

impl fmt::Debug for FlowReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("FlowReceiver")
            .field("session_id", &core.session_id)
            .field("flow", &core.flow)
            .field("next_implicit", &core.next_implicit)
            .field("buffered", &core.buffered.len())
            .finish()
    }
}

impl Drop for FlowReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use crossbeam_channel::{Receiver, bounded};
    use fixp_core::frame::encode_application_frame;
    use std::time::Instant;

    struct Fixture {
        receiver: FlowReceiver,
        transport: Arc<RecordingTransport>,
        reactor: EventReactor,
        session_id: SessionId,
    }

    fn fixture(flow: FlowType, max_buffered: usize) -> Fixture {
        let reactor = EventReactor::new();
        let transport = Arc::new(RecordingTransport::new());
        let session_id = SessionId::generate();
        let receiver = FlowReceiver::new(
            flow,
            session_id,
            transport.clone(),
            Arc::new(Sequencer::new()),
            reactor.clone(),
            1,
            max_buffered,
        );
        Fixture {
            receiver,
            transport,
            reactor,
            session_id,
        }
    }

    fn frame(tag: u8) -> Bytes {
        encode_application_frame(1, 100, 1, &[tag]).unwrap()
    }

    fn seqs(inbound: &Inbound) -> Vec<u64> {
        inbound.deliveries.iter().map(|(seq, _)| *seq).collect()
    }

    fn watch(f: &Fixture, kind: EventKind) -> Receiver<(Instant, Payload)> {
        let (tx, rx) = bounded(16);
        f.reactor
            .subscribe(Topic::new(f.session_id, kind), move |event| {
                let _ = tx.try_send((Instant::now(), event.payload.clone()));
                Ok(())
            })
            .unwrap();
        rx
    }

    #[test]
    fn test_none_flow_drops_application_frames() {
        let f = fixture(FlowType::None, 8);
        assert!(f.receiver.on_application(frame(1)).unwrap().deliveries.is_empty());
    }

    #[test]
    fn test_unsequenced_delivers_with_zero() {
        let f = fixture(FlowType::Unsequenced, 8);
        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![0]);
    }

    #[test]
    fn test_idempotent_accepts_any_order() {
        let f = fixture(FlowType::Idempotent, 8);
        f.receiver.on_sequence(5);
        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![5]);
        f.receiver.on_sequence(2);
        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![2]);
        f.receiver.on_sequence(5);
        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![5]);
        assert_eq!(f.receiver.highest_seen(), 5);
        assert!(f.transport.written().is_empty());
    }

    #[test]
    fn test_recoverable_buffers_until_filled() {
        let f = fixture(FlowType::Recoverable, 8);
        let gaps = watch(&f, EventKind::NotApplied);
        f.reactor.open().unwrap();

        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![1]);

        f.receiver.on_sequence(4);
        let held = f.receiver.on_application(frame(4)).unwrap();
        assert!(held.deliveries.is_empty());
        assert_eq!(f.receiver.buffered(), 1);
        assert_eq!(
            SessionMessage::decode(&f.transport.written()[0]).unwrap(),
            SessionMessage::NotApplied {
                from_seq: 2,
                count: 2
            }
        );

        f.receiver.on_retransmission(2, 2);
        assert_eq!(seqs(&f.receiver.on_application(frame(2)).unwrap()), vec![2]);
        assert_eq!(seqs(&f.receiver.on_application(frame(3)).unwrap()), vec![3, 4]);
        assert_eq!(f.receiver.buffered(), 0);

        let (_, payload) = gaps.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(payload, Payload::NotApplied(NotAppliedRange::inbound(2, 3)));
        assert!(gaps.recv_timeout(Duration::from_millis(50)).is_err());
        f.reactor.close();
    }

    #[test]
    fn test_recoverable_gap_reported_once() {
        let f = fixture(FlowType::Recoverable, 8);
        f.receiver.on_sequence(3);
        f.receiver.on_application(frame(3)).unwrap();
        f.receiver.on_application(frame(4)).unwrap();
        f.receiver.on_sequence(7);
        let inbound = f.receiver.on_application(frame(7)).unwrap();

        assert_eq!(inbound.gap, None);
        let reported: Vec<SessionMessage> = f
            .transport
            .written()
            .iter()
            .map(|b| SessionMessage::decode(b).unwrap())
            .collect();
        assert_eq!(
            reported,
            vec![
                SessionMessage::NotApplied {
                    from_seq: 1,
                    count: 2
                },
                SessionMessage::NotApplied {
                    from_seq: 5,
                    count: 2
                },
            ]
        );
        assert_eq!(f.receiver.buffered(), 3);
    }

    #[test]
    fn test_recoverable_duplicates_dropped() {
        let f = fixture(FlowType::Recoverable, 8);
        f.receiver.on_application(frame(1)).unwrap();
        f.receiver.on_application(frame(2)).unwrap();
        f.receiver.on_retransmission(1, 2);
        assert!(f.receiver.on_application(frame(1)).unwrap().deliveries.is_empty());
        assert!(f.receiver.on_application(frame(2)).unwrap().deliveries.is_empty());
        assert_eq!(seqs(&f.receiver.on_application(frame(3)).unwrap()), vec![3]);
    }

    #[test]
    fn test_full_gap_buffer_rereports_dropped_frames() {
        let f = fixture(FlowType::Recoverable, 1);
        f.receiver.on_sequence(2);
        f.receiver.on_application(frame(2)).unwrap();
        f.receiver.on_application(frame(3)).unwrap();
        assert_eq!(f.receiver.buffered(), 1);

        let inbound = f.receiver.on_application(frame(4)).unwrap();
        assert_eq!(inbound.gap, Some(NotAppliedRange::inbound(3, 3)));
    }

    fn reports(f: &Fixture) -> Vec<SessionMessage> {
        f.transport
            .written()
            .iter()
            .map(|b| SessionMessage::decode(b).unwrap())
            .collect()
    }

    #[test]
    fn test_dropped_frame_inside_reported_range_is_requested_again() {
        let f = fixture(FlowType::Recoverable, 1);
        f.receiver.on_sequence(3);
        f.receiver.on_application(frame(3)).unwrap();
        assert_eq!(f.receiver.buffered(), 1);

        // 2 was already part of the first report and is dropped on a full buffer.
        f.receiver.on_retransmission(2, 1);
        assert!(f.receiver.on_application(frame(2)).unwrap().deliveries.is_empty());
        f.receiver.on_retransmission(1, 1);
        assert_eq!(seqs(&f.receiver.on_application(frame(1)).unwrap()), vec![1]);

        f.receiver.on_sequence(4);
        for tag in 4..=8 {
            f.receiver.on_application(frame(tag)).unwrap();
        }
        let sent = reports(&f);
        assert_eq!(
            sent[0],
            SessionMessage::NotApplied {
                from_seq: 1,
                count: 2
            }
        );
        assert!(sent.contains(&SessionMessage::NotApplied {
            from_seq: 2,
            count: 2
        }));

        f.receiver.on_retransmission(2, 1);
        assert_eq!(seqs(&f.receiver.on_application(frame(2)).unwrap()), vec![2, 3]);
        assert_eq!(f.receiver.buffered(), 0);
    }

    #[test]
    fn test_sequence_past_last_number_is_rejected() {
        let f = fixture(FlowType::Recoverable, 8);
        f.receiver.on_sequence(u64::MAX);
        assert_eq!(
            f.receiver.on_application(frame(1)).unwrap_err(),
            SessionError::SequenceOverflow(u64::MAX)
        );

        let f = fixture(FlowType::Idempotent, 8);
        f.receiver.on_retransmission(u64::MAX, 1);
        assert!(f.receiver.on_application(frame(1)).is_err());
        assert_eq!(f.receiver.highest_seen(), 0);
    }

    #[test]
    fn test_watchdog_fires_once_after_silence() {
        let f = fixture(FlowType::Idempotent, 8);
        let terminated = watch(&f, EventKind::PeerTerminated);
        f.reactor.open().unwrap();

        let interval = Duration::from_millis(50);
        let start = Instant::now();
        f.receiver.start_watchdog(interval).unwrap();

        let (at, payload) = terminated.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(at.duration_since(start) >= interval);
        assert!(matches!(payload, Payload::Fault(ref fault) if fault.kind == FaultKind::HeartbeatTimeout));
        assert!(terminated.recv_timeout(interval * 4).is_err());
        assert!(f.receiver.is_inert());
        assert_eq!(
            f.reactor
                .subscriber_count(&Topic::new(f.session_id, EventKind::PeerHeartbeat)),
            0
        );
        f.reactor.close();
    }

    #[test]
    fn test_traffic_resets_watchdog() {
        let f = fixture(FlowType::Idempotent, 8);
        let terminated = watch(&f, EventKind::PeerTerminated);
        f.reactor.open().unwrap();

        let interval = Duration::from_millis(60);
        f.receiver.start_watchdog(interval).unwrap();
        let until = Instant::now() + interval * 5;
        while Instant::now() < until {
            f.receiver.on_heartbeat();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(terminated.try_recv().is_err());
        assert!(!f.receiver.is_inert());

        assert!(terminated.recv_timeout(Duration::from_secs(2)).is_ok());
        f.reactor.close();
    }
}
