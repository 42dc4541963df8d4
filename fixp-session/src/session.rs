/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! FIXP session state machine.
//!
//! A [`FixpSession`] binds one transport at a time to one reactor. Transport
//! callbacks never touch session state: they post `TRANSPORT_CONNECTED`,
//! `FRAME_RECEIVED` and `TRANSPORT_DISCONNECTED` events, tagged with the
//! transport generation, and the session advances on the reactor thread.
//! Events from a replaced transport are discarded as stale.
//!
//! Clients send Negotiate once connected. Servers authenticate it, answer
//! with Establish, and adopt the client's session id. Both sides then install
//! a [`FlowSender`] and a [`FlowReceiver`] and publish `SESSION_READY`.
//!
//! Two peers sharing a session id must run on different reactors.

use crate::auth::{AuthOutcome, Authenticator};
use crate::completion::{SessionReadyFuture, SessionTerminatedFuture};
use crate::config::SessionConfig;
use crate::consumer::{MessageConsumer, NoOpConsumer};
use crate::flow::{FlowReceiver, FlowSender};
use crate::sequence::{SequenceState, Sequencer};
use crate::state::{Role, SessionState};
use bytes::Bytes;
use fixp_core::error::{EncodeError, FixpError, Result, SessionError};
use fixp_core::frame::{
    Establish, MessageHeader, Negotiate, SessionMessage, Terminate, validate_application_frame,
};
use fixp_core::types::{
    FaultKind, FlowType, NotAppliedRange, SessionFault, SessionId, TerminationCode,
};
use fixp_reactor::{Event, EventKind, EventReactor, Payload, Subscription, Topic};
use fixp_transport::{
    BackpressurePolicy, BufferSupplier, BufferedTransportConsumer, HeapBufferSupplier, Transport,
    TransportConsumer,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type Deliveries = SmallVec<[(u64, Bytes); 1]>;

/// Posts transport callbacks to the owning reactor.
struct LinkConsumer {
    reactor: EventReactor,
    link_id: SessionId,
    generation: u64,
}

impl LinkConsumer {
    fn post(&self, kind: EventKind, payload: Payload) {
        if let Err(err) = self.reactor.post(Topic::new(self.link_id, kind), payload) {
            debug!(link_id = %self.link_id, %kind, error = %err, "transport event dropped");
        }
    }
}

impl TransportConsumer for LinkConsumer {
    fn connected(&self) {
        self.post(
            EventKind::TransportConnected,
            Payload::Link {
                generation: self.generation,
            },
        );
    }

    fn disconnected(&self) {
        self.post(
            EventKind::TransportDisconnected,
            Payload::Link {
                generation: self.generation,
            },
        );
    }

    fn accept(&self, frame: Bytes) {
        self.post(
            EventKind::FrameReceived,
            Payload::Frame {
                generation: self.generation,
                frame,
            },
        );
    }
}

struct SessionCore {
    state: SessionState,
    session_id: Option<SessionId>,
    opened: bool,
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    ingest: Option<Arc<BufferedTransportConsumer>>,
    sender: Option<FlowSender>,
    receiver: Option<FlowReceiver>,
    peer_flow: Option<FlowType>,
    links: Vec<Subscription>,
    watches: Vec<Subscription>,
    outcome: Option<Option<SessionFault>>,
}

impl SessionCore {
    fn write_control(&self, message: &SessionMessage) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "control frame not encoded");
                return false;
            }
        };
        match transport.write(&frame) {
            Ok(_) => true,
            Err(err) => {
                debug!(template = ?message.template(), error = %err, "control frame not written");
                false
            }
        }
    }

    fn release_transport(&mut self) {
        self.generation += 1;
        self.sender = None;
        self.receiver = None;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(stage) = self.ingest.take() {
            stage.shutdown();
        }
    }
}

struct SessionShared {
    reactor: EventReactor,
    role: Role,
    config: SessionConfig,
    link_id: SessionId,
    authenticator: Option<Arc<dyn Authenticator>>,
    consumer: Arc<dyn MessageConsumer>,
    buffers: Arc<dyn BufferSupplier>,
    sequencer: Arc<Sequencer>,
    core: Mutex<SessionCore>,
}

/// FIXP session endpoint.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct FixpSession {
    shared: Arc<SessionShared>,
}

impl FixpSession {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> FixpSessionBuilder {
        FixpSessionBuilder::new()
    }

    /// Opens the transport. Negotiation starts once it connects.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if already opened,
    /// `ReactorError` if the reactor was closed, or `TransportError` if the
    /// transport cannot open.
    pub fn open(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.opened || core.state != SessionState::Unestablished {
            return Err(invalid_state("Unestablished", core.state).into());
        }
        let Some(transport) = core.transport.take() else {
            return Err(SessionError::Configuration("no transport bound".to_string()).into());
        };

        core.links = self.subscribe_links()?;
        if let Some(id) = core.session_id {
            core.watches = self.subscribe_watches(id)?;
        }
        self.bind_transport(&mut core, transport)?;
        core.opened = true;
        info!(
            session_id = ?core.session_id,
            role = %self.shared.role,
            flow = %self.shared.config.outbound_flow,
            "session opened"
        );
        Ok(())
    }

    /// Sends one application frame.
    ///
    /// Returns the sequence number assigned by the outbound flow, or 0 for
    /// unsequenced flows.
    ///
    /// # Errors
    /// Returns `EncodeError` for a malformed or oversized frame and
    /// `SessionError::InvalidState` unless the session is Established. No
    /// frame is written in either case.
    pub fn send(&self, frame: &[u8]) -> Result<u64> {
        let max_size = self.shared.config.max_frame_size;
        if frame.len() > max_size {
            return Err(EncodeError::FrameTooLarge {
                size: frame.len(),
                max_size,
            }
            .into());
        }
        validate_application_frame(frame)?;

        let core = self.shared.core.lock();
        match (&core.sender, core.state) {
            (Some(sender), SessionState::Established) => Ok(sender.send(frame)?),
            _ => Err(invalid_state("Established", core.state).into()),
        }
    }

    /// Ends the session.
    ///
    /// An established session writes its end-of-stream marker first. The
    /// session is Terminated when this returns.
    ///
    /// # Errors
    /// Currently infallible; reserved for transports that confirm flushes.
    pub fn close(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        match core.state {
            SessionState::Terminated => return Ok(()),
            SessionState::Established => {
                if let Some(sender) = &core.sender {
                    match sender.send_end_of_stream() {
                        Ok(true) => debug!(session_id = ?core.session_id, "end of stream sent"),
                        Ok(false) => debug!(session_id = ?core.session_id, "end of stream lost"),
                        Err(err) => debug!(session_id = ?core.session_id, error = %err, "end of stream"),
                    }
                }
            }
            _ => {}
        }
        self.terminate(&mut core, None, false);
        Ok(())
    }

    /// Binds a new transport to a suspended session and re-negotiates over
    /// it. Sequence state is retained.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` unless Suspended, or
    /// `TransportError` if the transport cannot open.
    pub fn reattach(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state != SessionState::Suspended {
            return Err(invalid_state("Suspended", core.state).into());
        }
        self.bind_transport(&mut core, transport)?;
        info!(
            session_id = ?core.session_id,
            generation = core.generation,
            "transport reattached"
        );
        Ok(())
    }

    /// Resends frames from the application's own storage after the peer
    /// reported them not applied.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` unless Established, or
    /// `SessionError::UnsupportedByFlow` unless the outbound flow is
    /// Recoverable.
    pub fn retransmit(&self, first_seq: u64, frames: &[Bytes]) -> Result<()> {
        let core = self.shared.core.lock();
        match (&core.sender, core.state) {
            (Some(sender), SessionState::Established) => {
                Ok(sender.retransmit(first_seq, frames)?)
            }
            _ => Err(invalid_state("Established", core.state).into()),
        }
    }

    /// Returns a completion resolved when the session is Established.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` while a server session has not
    /// yet learned its id, or `ReactorError` if the reactor was closed.
    pub fn ready(&self) -> Result<SessionReadyFuture> {
        let id = self.require_id()?;
        let future = SessionReadyFuture::new(&self.shared.reactor, id)?;
        let core = self.shared.core.lock();
        match core.state {
            SessionState::Established => {
                future.resolve(Ok(id));
            }
            SessionState::Terminated => {
                future.resolve(Err(SessionError::Faulted(outcome_fault(&core.outcome))));
            }
            _ => {}
        }
        Ok(future)
    }

    /// Returns a completion resolved when the session is Terminated.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` while a server session has not
    /// yet learned its id, or `ReactorError` if the reactor was closed.
    pub fn terminated(&self) -> Result<SessionTerminatedFuture> {
        let id = self.require_id()?;
        let future = SessionTerminatedFuture::new(&self.shared.reactor, id)?;
        let core = self.shared.core.lock();
        if let Some(outcome) = &core.outcome {
            future.resolve(match outcome {
                None => Ok(()),
                Some(fault) => Err(SessionError::Faulted(fault.clone())),
            });
        }
        Ok(future)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    /// Returns the session id, once known.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.core.lock().session_id
    }

    /// Returns the handshake role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Returns the outbound flow.
    #[must_use]
    pub fn outbound_flow(&self) -> FlowType {
        self.shared.config.outbound_flow
    }

    /// Returns the flow the peer declared, once negotiated.
    #[must_use]
    pub fn peer_flow(&self) -> Option<FlowType> {
        self.shared.core.lock().peer_flow
    }

    /// Returns a snapshot of the sequence counters.
    #[must_use]
    pub fn sequence_state(&self) -> SequenceState {
        self.shared.sequencer.state()
    }

    /// Returns the reactor the session runs on.
    #[must_use]
    pub fn reactor(&self) -> &EventReactor {
        &self.shared.reactor
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    fn require_id(&self) -> Result<SessionId> {
        let core = self.shared.core.lock();
        core.session_id
            .ok_or_else(|| invalid_state("negotiated session id", core.state).into())
    }

    fn subscribe_links(&self) -> Result<Vec<Subscription>> {
        let mut links = Vec::with_capacity(3);
        for kind in [
            EventKind::TransportConnected,
            EventKind::FrameReceived,
            EventKind::TransportDisconnected,
        ] {
            let weak = Arc::downgrade(&self.shared);
            let topic = Topic::new(self.shared.link_id, kind);
            links.push(self.shared.reactor.subscribe(topic, move |event| {
                if let Some(session) = upgrade(&weak) {
                    session.on_link_event(event);
                }
                Ok(())
            })?);
        }
        Ok(links)
    }

    fn subscribe_watches(&self, id: SessionId) -> Result<Vec<Subscription>> {
        let mut watches = Vec::with_capacity(2);
        for kind in [EventKind::PeerTerminated, EventKind::SessionSuspended] {
            let weak = Arc::downgrade(&self.shared);
            watches.push(
                self.shared
                    .reactor
                    .subscribe(Topic::new(id, kind), move |event| {
                        if let Some(session) = upgrade(&weak) {
                            session.on_session_event(event);
                        }
                        Ok(())
                    })?,
            );
        }
        Ok(watches)
    }

    fn bind_transport(&self, core: &mut SessionCore, transport: Arc<dyn Transport>) -> Result<()> {
        core.generation += 1;
        let link: Arc<dyn TransportConsumer> = Arc::new(LinkConsumer {
            reactor: self.shared.reactor.clone(),
            link_id: self.shared.link_id,
            generation: core.generation,
        });
        let consumer: Arc<dyn TransportConsumer> = match self.shared.config.ingest_queue_capacity {
            Some(capacity) => {
                let stage = Arc::new(BufferedTransportConsumer::new(
                    link,
                    capacity,
                    BackpressurePolicy::Spin,
                )?);
                core.ingest = Some(Arc::clone(&stage));
                stage
            }
            None => link,
        };
        transport.open(Arc::clone(&self.shared.buffers), consumer)?;
        core.transport = Some(transport);
        Ok(())
    }

    fn publish(&self, id: SessionId, kind: EventKind, payload: Payload) {
        if let Err(err) = self.shared.reactor.post(Topic::new(id, kind), payload) {
            debug!(session_id = %id, %kind, error = %err, "event not posted");
        }
    }

    fn on_link_event(&self, event: &Event) {
        match (&event.payload, event.topic.kind()) {
            (Payload::Link { generation }, EventKind::TransportConnected) => {
                self.on_connected(*generation);
            }
            (Payload::Frame { generation, frame }, EventKind::FrameReceived) => {
                let deliveries = self.on_frame(*generation, frame.clone());
                for (seq, frame) in deliveries {
                    self.shared.consumer.accept(&frame, self, seq);
                }
            }
            (Payload::Link { generation }, EventKind::TransportDisconnected) => {
                self.on_disconnected(*generation);
            }
            (payload, kind) => debug!(%kind, ?payload, "unexpected transport event"),
        }
    }

    fn is_stale(core: &SessionCore, generation: u64) -> bool {
        if generation != core.generation || core.state.is_terminal() {
            debug!(
                session_id = ?core.session_id,
                generation,
                current = core.generation,
                state = %core.state,
                "stale event discarded"
            );
            return true;
        }
        false
    }

    fn on_connected(&self, generation: u64) {
        let mut core = self.shared.core.lock();
        if Self::is_stale(&core, generation) {
            return;
        }
        if !matches!(
            core.state,
            SessionState::Unestablished | SessionState::Suspended
        ) {
            debug!(state = %core.state, "connect ignored");
            return;
        }

        if self.shared.role == Role::Client
            && let Some(session_id) = core.session_id
        {
            let config = &self.shared.config;
            let negotiate = SessionMessage::Negotiate(Negotiate {
                session_id,
                flow: config.outbound_flow,
                keepalive_ms: config.keepalive_ms(),
                next_seq: self.shared.sequencer.last_outbound() + 1,
                credentials: config.credentials.clone(),
            });
            if !core.write_control(&negotiate) {
                let fault = SessionFault::new(FaultKind::Transport, "negotiate not written");
                self.suspend(&mut core, fault);
                return;
            }
        }
        core.state = SessionState::Negotiating;
        info!(session_id = ?core.session_id, role = %self.shared.role, state = %core.state, "transport connected");
    }

    fn on_disconnected(&self, generation: u64) {
        let mut core = self.shared.core.lock();
        if Self::is_stale(&core, generation) {
            return;
        }
        self.suspend(
            &mut core,
            SessionFault::new(FaultKind::Transport, "transport disconnected"),
        );
    }

    fn on_frame(&self, generation: u64, frame: Bytes) -> Deliveries {
        let mut core = self.shared.core.lock();
        if Self::is_stale(&core, generation) {
            return Deliveries::new();
        }

        let header = match MessageHeader::decode(&frame) {
            Ok(header) => header,
            Err(err) => {
                self.violation(&mut core, &err.to_string());
                return Deliveries::new();
            }
        };

        if header.is_session() {
            match SessionMessage::decode(&frame) {
                Ok(message) => self.on_control(&mut core, message),
                Err(err) => self.violation(&mut core, &err.to_string()),
            }
            return Deliveries::new();
        }

        let accepted = match (&core.receiver, core.state) {
            (Some(receiver), SessionState::Established) => receiver.on_application(frame),
            _ => {
                warn!(session_id = ?core.session_id, state = %core.state, "application frame before establishment dropped");
                return Deliveries::new();
            }
        };
        match accepted {
            Ok(inbound) => inbound.deliveries,
            Err(err) => {
                self.violation(&mut core, &err.to_string());
                Deliveries::new()
            }
        }
    }

    fn on_control(&self, core: &mut SessionCore, message: SessionMessage) {
        debug!(session_id = ?core.session_id, template = ?message.template(), "control frame");
        match message {
            SessionMessage::Negotiate(negotiate) => self.on_negotiate(core, negotiate),
            SessionMessage::Establish(establish) => self.on_establish(core, establish),
            SessionMessage::Terminate(terminate) => self.on_terminate(core, terminate),
            SessionMessage::UnsequencedHeartbeat => {
                if let Some(receiver) = &core.receiver {
                    receiver.on_heartbeat();
                }
            }
            SessionMessage::Sequence { next_seq } => {
                if let Some(receiver) = &core.receiver {
                    receiver.on_sequence(next_seq);
                }
            }
            SessionMessage::Retransmission { next_seq, count } => {
                if let Some(receiver) = &core.receiver {
                    receiver.on_retransmission(next_seq, count);
                }
            }
            SessionMessage::NotApplied { from_seq, count } => {
                if let Some(receiver) = &core.receiver {
                    receiver.on_heartbeat();
                }
                let Some(to) = from_seq.checked_add(u64::from(count.saturating_sub(1))) else {
                    let err = SessionError::SequenceOverflow(from_seq);
                    self.violation(core, &err.to_string());
                    return;
                };
                if count > 0
                    && let Some(id) = core.session_id
                {
                    let range = NotAppliedRange::outbound(from_seq, to);
                    info!(session_id = %id, from = range.from, to = range.to, "peer reported gap");
                    self.publish(id, EventKind::NotApplied, Payload::NotApplied(range));
                }
            }
            SessionMessage::FinishedSending { last_seq } => {
                info!(session_id = ?core.session_id, last_seq, "peer finished sending");
                if let Some(id) = core.session_id {
                    core.write_control(&SessionMessage::Terminate(Terminate {
                        session_id: id,
                        code: TerminationCode::Finished,
                    }));
                }
                self.terminate(core, None, true);
            }
        }
    }

    fn on_negotiate(&self, core: &mut SessionCore, negotiate: Negotiate) {
        let Some(authenticator) = &self.shared.authenticator else {
            self.violation(core, "client received Negotiate");
            return;
        };
        if core.state != SessionState::Negotiating {
            self.violation(core, "unexpected Negotiate");
            return;
        }
        let id = negotiate.session_id;
        if core.session_id.is_some_and(|current| current != id) {
            self.reject(core, id, TerminationCode::ProtocolViolation, "session id changed");
            return;
        }

        if let AuthOutcome::Rejected(code) = authenticator.authenticate(&negotiate.credentials) {
            self.adopt_id(core, id);
            self.reject(core, id, code, "credentials rejected");
            return;
        }
        if !self.shared.config.accepts(negotiate.flow) {
            self.adopt_id(core, id);
            let detail = format!("flow {} not accepted", negotiate.flow);
            self.reject(core, id, TerminationCode::UnsupportedFlow, &detail);
            return;
        }
        if let Err(detail) = self.check_peer_sequence(negotiate.next_seq) {
            self.adopt_id(core, id);
            self.reject(core, id, TerminationCode::SequenceRegression, &detail);
            return;
        }

        self.adopt_id(core, id);
        let config = &self.shared.config;
        let establish = SessionMessage::Establish(Establish {
            session_id: id,
            flow: config.outbound_flow,
            keepalive_ms: config.keepalive_ms(),
            next_seq: self.shared.sequencer.last_outbound() + 1,
        });
        if !core.write_control(&establish) {
            let fault = SessionFault::new(FaultKind::Transport, "establish not written");
            self.suspend(core, fault);
            return;
        }
        self.establish(core, negotiate.flow, negotiate.keepalive_ms, negotiate.next_seq);
    }

    fn on_establish(&self, core: &mut SessionCore, establish: Establish) {
        if self.shared.role != Role::Client || core.state != SessionState::Negotiating {
            self.violation(core, "unexpected Establish");
            return;
        }
        if core.session_id != Some(establish.session_id) {
            self.violation(core, "Establish for another session");
            return;
        }
        if let Err(detail) = self.check_peer_sequence(establish.next_seq) {
            self.reject(
                core,
                establish.session_id,
                TerminationCode::SequenceRegression,
                &detail,
            );
            return;
        }
        self.establish(core, establish.flow, establish.keepalive_ms, establish.next_seq);
    }

    fn on_terminate(&self, core: &mut SessionCore, terminate: Terminate) {
        if core.session_id.is_none() {
            core.session_id = Some(terminate.session_id);
        }
        let fault = match terminate.code {
            TerminationCode::Finished => None,
            code => Some(
                SessionFault::new(code.fault_kind(), format!("peer terminated: {code}"))
                    .with_code(code),
            ),
        };
        self.terminate(core, fault, true);
    }

    fn on_session_event(&self, event: &Event) {
        let Payload::Fault(fault) = &event.payload else {
            return;
        };
        let mut core = self.shared.core.lock();
        if core.state != SessionState::Established {
            return;
        }
        let suspend = match event.topic.kind() {
            EventKind::PeerTerminated => fault.kind == FaultKind::HeartbeatTimeout,
            EventKind::SessionSuspended => core.sender.as_ref().is_some_and(FlowSender::is_faulted),
            _ => false,
        };
        if suspend {
            self.suspend(&mut core, fault.clone());
        }
    }

    fn check_peer_sequence(&self, next_seq: u64) -> std::result::Result<(), String> {
        let last = self.shared.sequencer.last_inbound();
        if next_seq == 0 || next_seq <= last {
            return Err(format!(
                "peer next sequence {next_seq} regresses below accepted {last}"
            ));
        }
        Ok(())
    }

    fn adopt_id(&self, core: &mut SessionCore, id: SessionId) {
        if core.session_id.is_some() {
            return;
        }
        core.session_id = Some(id);
        match self.subscribe_watches(id) {
            Ok(watches) => core.watches = watches,
            Err(err) => warn!(session_id = %id, error = %err, "session events not watched"),
        }
    }

    fn establish(
        &self,
        core: &mut SessionCore,
        peer_flow: FlowType,
        peer_keepalive_ms: u32,
        peer_next_seq: u64,
    ) {
        let (Some(id), Some(transport)) = (core.session_id, core.transport.clone()) else {
            return;
        };
        let shared = &self.shared;

        let sender = FlowSender::new(
            shared.config.outbound_flow,
            id,
            Arc::clone(&transport),
            Arc::clone(&shared.sequencer),
            shared.reactor.clone(),
        );
        if let Err(err) = sender.start_keepalive(shared.config.keepalive_interval) {
            warn!(session_id = %id, error = %err, "keepalive not scheduled");
        }

        let receiver = FlowReceiver::new(
            peer_flow,
            id,
            transport,
            Arc::clone(&shared.sequencer),
            shared.reactor.clone(),
            peer_next_seq,
            shared.config.max_buffered_frames,
        );
        if let Some(interval) = shared.config.watchdog_interval(peer_keepalive_ms)
            && let Err(err) = receiver.start_watchdog(interval)
        {
            warn!(session_id = %id, error = %err, "watchdog not scheduled");
        }

        core.sender = Some(sender);
        core.receiver = Some(receiver);
        core.peer_flow = Some(peer_flow);
        core.state = SessionState::Established;
        info!(
            session_id = %id,
            role = %shared.role,
            flow = %shared.config.outbound_flow,
            peer_flow = %peer_flow,
            seq = shared.sequencer.last_outbound(),
            "session established"
        );
        self.publish(id, EventKind::SessionReady, Payload::Ready(id));
    }

    fn violation(&self, core: &mut SessionCore, detail: &str) {
        let id = core.session_id.unwrap_or(self.shared.link_id);
        self.reject(core, id, TerminationCode::ProtocolViolation, detail);
    }

    fn reject(&self, core: &mut SessionCore, id: SessionId, code: TerminationCode, detail: &str) {
        warn!(session_id = %id, %code, "session rejected: {detail}");
        core.write_control(&SessionMessage::Terminate(Terminate {
            session_id: id,
            code,
        }));
        let fault = SessionFault::new(code.fault_kind(), detail).with_code(code);
        self.terminate(core, Some(fault), false);
    }

    fn suspend(&self, core: &mut SessionCore, fault: SessionFault) {
        if matches!(
            core.state,
            SessionState::Suspended | SessionState::Terminated
        ) {
            return;
        }
        core.release_transport();
        core.state = SessionState::Suspended;
        warn!(session_id = ?core.session_id, state = %core.state, "session suspended: {fault}");
        if let Some(id) = core.session_id {
            self.publish(id, EventKind::SessionSuspended, Payload::Fault(fault));
        }
    }

    fn terminate(&self, core: &mut SessionCore, fault: Option<SessionFault>, by_peer: bool) {
        if core.state.is_terminal() {
            return;
        }
        core.release_transport();
        core.state = SessionState::Terminated;
        for subscription in core.links.drain(..).chain(core.watches.drain(..)) {
            subscription.unsubscribe();
        }
        core.outcome = Some(fault.clone());

        let payload = match fault {
            Some(fault) => {
                warn!(session_id = ?core.session_id, "session terminated: {fault}");
                Payload::Fault(fault)
            }
            None => {
                info!(session_id = ?core.session_id, "session terminated");
                Payload::Closed
            }
        };
        if let Some(id) = core.session_id {
            if by_peer {
                self.publish(id, EventKind::PeerTerminated, payload.clone());
            }
            self.publish(id, EventKind::SessionTerminated, payload);
        }
    }
}

impl fmt::Debug for FixpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("FixpSession")
            .field("session_id", &core.session_id)
            .field("role", &self.shared.role)
            .field("state", &core.state)
            .field("generation", &core.generation)
            .finish()
    }
}

fn upgrade(weak: &Weak<SessionShared>) -> Option<FixpSession> {
    weak.upgrade().map(|shared| FixpSession { shared })
}

fn invalid_state(expected: &str, current: SessionState) -> SessionError {
    SessionError::InvalidState {
        expected: expected.to_string(),
        current: current.to_string(),
    }
}

fn outcome_fault(outcome: &Option<Option<SessionFault>>) -> SessionFault {
    match outcome {
        Some(Some(fault)) => fault.clone(),
        _ => SessionFault::new(FaultKind::ProtocolViolation, "session already terminated"),
    }
}

/// Builder for a [`FixpSession`].
pub struct FixpSessionBuilder {
    reactor: Option<EventReactor>,
    transport: Option<Arc<dyn Transport>>,
    buffers: Option<Arc<dyn BufferSupplier>>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    config: SessionConfig,
    session_id: Option<SessionId>,
    sequence: Option<SequenceState>,
}

impl Default for FixpSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixpSessionBuilder {
    /// Creates a builder for a client session with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reactor: None,
            transport: None,
            buffers: None,
            consumer: None,
            authenticator: None,
            config: SessionConfig::default(),
            session_id: None,
            sequence: None,
        }
    }

    /// Sets the reactor the session runs on. Required.
    #[must_use]
    pub fn with_reactor(mut self, reactor: EventReactor) -> Self {
        self.reactor = Some(reactor);
        self
    }

    /// Sets the transport. Required.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the buffer supplier handed to transports.
    #[must_use]
    pub fn with_buffer_supplier(mut self, buffers: Arc<dyn BufferSupplier>) -> Self {
        self.buffers = Some(buffers);
        self
    }

    /// Sets the consumer of inbound application frames.
    #[must_use]
    pub fn with_message_consumer<C>(mut self, consumer: C) -> Self
    where
        C: MessageConsumer + 'static,
    {
        self.consumer = Some(Arc::new(consumer));
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the id of a client session instead of generating one.
    #[must_use]
    pub const fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Resumes sequence counters from a previous session.
    #[must_use]
    pub const fn with_sequence_state(mut self, state: SequenceState) -> Self {
        self.sequence = Some(state);
        self
    }

    /// Makes this a server session that authenticates clients.
    #[must_use]
    pub fn as_server(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Builds the session.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if the reactor or transport is
    /// missing or the configuration is inconsistent.
    pub fn build(self) -> std::result::Result<FixpSession, FixpError> {
        let reactor = self
            .reactor
            .ok_or_else(|| SessionError::Configuration("reactor is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| SessionError::Configuration("transport is required".to_string()))?;
        self.config.validate()?;

        let role = if self.authenticator.is_some() {
            Role::Server
        } else {
            Role::Client
        };
        let (session_id, link_id) = match role {
            Role::Client => {
                let id = self.session_id.unwrap_or_else(SessionId::generate);
                (Some(id), id)
            }
            Role::Server => (None, SessionId::generate()),
        };
        let sequencer = match self.sequence {
            Some(state) => {
                Sequencer::with_initial(state.last_outbound_assigned, state.last_inbound_accepted)
            }
            None => Sequencer::new(),
        };

        Ok(FixpSession {
            shared: Arc::new(SessionShared {
                reactor,
                role,
                config: self.config,
                link_id,
                authenticator: self.authenticator,
                consumer: self.consumer.unwrap_or_else(|| Arc::new(NoOpConsumer)),
                buffers: self
                    .buffers
                    .unwrap_or_else(|| Arc::new(HeapBufferSupplier::default())),
                sequencer: Arc::new(sequencer),
                core: Mutex::new(SessionCore {
                    state: SessionState::Unestablished,
                    session_id,
                    opened: false,
                    generation: 0,
                    transport: Some(transport),
                    ingest: None,
                    sender: None,
                    receiver: None,
                    peer_flow: None,
                    links: Vec::new(),
                    watches: Vec::new(),
                    outcome: None,
                }),
            }),
        })
    }
}
