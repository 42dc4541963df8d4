/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Single-threaded cooperative event reactor.
//!
//! An [`EventReactor`] owns one dispatch thread. Any thread may subscribe,
//! post, or schedule timers; every handler runs on the dispatch thread, one
//! event at a time, so state owned by handlers of one reactor needs no
//! further synchronization.
//!
//! Handlers of a topic run in registration order. A handler that returns an
//! error or panics is reported to the reactor's exception consumer and the
//! loop carries on with the remaining subscribers.

use crate::platform::{AffinityPinning, CorePinning, NoPinning};
use crate::topic::{Event, Payload, Topic};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use fixp_core::error::{FixpError, ReactorError};
use fixp_core::types::{FaultKind, SessionFault};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Outcome of a handler invocation.
pub type HandlerResult = Result<(), FixpError>;

/// Receives faults raised by handlers.
pub type ExceptionConsumer = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

type Handler = Box<dyn FnMut(&Event) -> HandlerResult + Send>;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Fault raised by a handler during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    /// Topic being dispatched.
    pub topic: Topic,
    /// Error text or panic message.
    pub reason: String,
    /// Whether the handler panicked rather than returning an error.
    pub panicked: bool,
}

impl HandlerFault {
    /// Converts this fault into a session fault.
    #[must_use]
    pub fn to_session_fault(&self) -> SessionFault {
        SessionFault::new(FaultKind::Handler, format!("{}: {}", self.topic, self.reason))
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    active: AtomicBool,
    handler: Mutex<Handler>,
}

enum Command {
    Post(Event),
    Schedule(TimerEntry),
    Shutdown,
}

struct TimerEntry {
    due: Instant,
    id: u64,
    event: Event,
    interval: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.id.cmp(&other.id))
    }
}

struct Shared {
    name: String,
    subscribers: Mutex<HashMap<Topic, Vec<Arc<Subscriber>>>>,
    next_id: AtomicU64,
    commands: Sender<Command>,
    inbox: Receiver<Command>,
    state: AtomicU8,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: OnceLock<ThreadId>,
    exception_consumer: ExceptionConsumer,
    core_id: Option<usize>,
    pinning: Arc<dyn CorePinning>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CLOSED
    }

    fn on_dispatch_thread(&self) -> bool {
        self.thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// Stops the dispatch thread and deactivates every subscriber. Returns
    /// false if the reactor was already closed.
    fn shutdown(&self) -> bool {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return false;
        }
        let _ = self.commands.send(Command::Shutdown);
        if !self.on_dispatch_thread()
            && let Some(handle) = self.dispatch_thread.lock().take()
            && handle.join().is_err()
        {
            error!(reactor = %self.name, "dispatch thread panicked");
        }

        let drained: Vec<Arc<Subscriber>> = self
            .subscribers
            .lock()
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        for subscriber in drained {
            subscriber.active.store(false, Ordering::Release);
        }
        true
    }

    fn remove_subscriber(&self, topic: &Topic, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(topic);
            }
        }
    }

    fn dispatch(&self, event: &Event) {
        let targets: SmallVec<[Arc<Subscriber>; 4]> = match self.subscribers.lock().get(&event.topic)
        {
            Some(list) => list.iter().cloned().collect(),
            None => {
                trace!(topic = %event.topic, "no subscribers");
                return;
            }
        };

        for subscriber in targets {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut handler = subscriber.handler.lock();
                (&mut *handler)(event)
            }));
            let fault = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => HandlerFault {
                    topic: event.topic,
                    reason: err.to_string(),
                    panicked: false,
                },
                Err(cause) => HandlerFault {
                    topic: event.topic,
                    reason: panic_message(cause.as_ref()),
                    panicked: true,
                },
            };
            (self.exception_consumer)(&fault);
        }
    }

    fn fire_due_timers(&self, timers: &mut BinaryHeap<Reverse<TimerEntry>>) {
        let now = Instant::now();
        loop {
            match timers.peek() {
                Some(Reverse(next)) if next.due <= now => {}
                _ => break,
            }
            let Some(Reverse(mut entry)) = timers.pop() else {
                break;
            };
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            self.dispatch(&entry.event);

            match entry.interval {
                Some(interval) if !entry.cancelled.load(Ordering::Acquire) => {
                    entry.due += interval;
                    if entry.due <= now {
                        entry.due = now + interval;
                    }
                    timers.push(Reverse(entry));
                }
                Some(_) => {}
                None => entry.cancelled.store(true, Ordering::Release),
            }
        }
    }

    fn run(self: Arc<Self>) {
        let _ = self.thread_id.set(thread::current().id());
        if let Some(core_id) = self.core_id
            && !self.pinning.pin(core_id)
        {
            tracing::warn!(reactor = %self.name, core_id, "core pinning unavailable");
        }
        info!(reactor = %self.name, "event reactor started");

        let mut timers: BinaryHeap<Reverse<TimerEntry>> = BinaryHeap::new();
        while !self.is_closed() {
            self.fire_due_timers(&mut timers);
            if self.is_closed() {
                break;
            }

            let next = match timers.peek() {
                Some(Reverse(entry)) => self.inbox.recv_deadline(entry.due),
                None => self.inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(Command::Post(event)) if !self.is_closed() => self.dispatch(&event),
                Ok(Command::Post(_)) => break,
                Ok(Command::Schedule(entry)) => timers.push(Reverse(entry)),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        debug!(reactor = %self.name, pending_timers = timers.len(), "event reactor stopped");
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn log_handler_fault(fault: &HandlerFault) {
    error!(
        topic = %fault.topic,
        panicked = fault.panicked,
        "handler fault: {}",
        fault.reason
    );
}

/// Registered handler of a topic.
///
/// Clones refer to the same registration. Cancelling is effective once; later
/// calls return `false`. A handler may cancel its own subscription while it
/// runs.
#[derive(Clone)]
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    owner: Weak<Shared>,
}

impl Subscription {
    /// Returns the subscribed topic.
    #[must_use]
    pub fn topic(&self) -> Topic {
        self.subscriber.topic
    }

    /// Returns true until the subscription is cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::Acquire)
    }

    /// Cancels the subscription.
    ///
    /// Returns `true` if this call cancelled it.
    pub fn unsubscribe(&self) -> bool {
        if !self.subscriber.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_subscriber(&self.subscriber.topic, self.subscriber.id);
        }
        true
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.subscriber.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle to a scheduled timer.
#[derive(Debug, Clone)]
pub struct TimerSchedule {
    topic: Topic,
    cancelled: Arc<AtomicBool>,
}

impl TimerSchedule {
    /// Returns the topic the timer posts to.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Cancels the timer.
    ///
    /// Returns `true` if this call cancelled a pending timer.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Returns true once the timer is cancelled or a one-shot timer has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Builder for an [`EventReactor`].
pub struct ReactorBuilder {
    name: String,
    core_id: Option<usize>,
    pinning: Option<Arc<dyn CorePinning>>,
    exception_consumer: ExceptionConsumer,
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "fixp-reactor".to_string(),
            core_id: None,
            pinning: None,
            exception_consumer: Arc::new(log_handler_fault),
        }
    }

    /// Sets the dispatch thread name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Pins the dispatch thread to a core.
    #[must_use]
    pub const fn pinned_to_core(mut self, core_id: usize) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Overrides the pinning capability.
    #[must_use]
    pub fn with_pinning(mut self, pinning: Arc<dyn CorePinning>) -> Self {
        self.pinning = Some(pinning);
        self
    }

    /// Sets the consumer of handler faults.
    #[must_use]
    pub fn with_exception_consumer<F>(mut self, consumer: F) -> Self
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        self.exception_consumer = Arc::new(consumer);
        self
    }

    /// Builds the reactor. It does not dispatch until [`EventReactor::open`].
    #[must_use]
    pub fn build(self) -> EventReactor {
        let (commands, inbox) = unbounded();
        let pinning = self.pinning.unwrap_or_else(|| match self.core_id {
            Some(_) => Arc::new(AffinityPinning),
            None => Arc::new(NoPinning),
        });
        let shared = Arc::new(Shared {
            name: self.name,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            commands,
            inbox,
            state: AtomicU8::new(STATE_IDLE),
            dispatch_thread: Mutex::new(None),
            thread_id: OnceLock::new(),
            exception_consumer: self.exception_consumer,
            core_id: self.core_id,
            pinning,
        });
        EventReactor {
            _handles: Arc::new(Handles(Arc::clone(&shared))),
            shared,
        }
    }
}

/// Shared by every [`EventReactor`] handle but not by the dispatch thread.
struct Handles(Arc<Shared>);

impl Drop for Handles {
    fn drop(&mut self) {
        if self.0.shutdown() {
            debug!(reactor = %self.0.name, "last handle dropped, event reactor closed");
        }
    }
}

/// Topic-keyed publish/subscribe dispatcher with timers.
///
/// Cloning yields another handle to the same reactor. Each reactor is an
/// independent instance with its own thread; there is no process-wide default.
/// The thread stops on [`close`](Self::close) or when the last handle is
/// dropped. A handle captured by one of the reactor's own handlers keeps it
/// running until `close`.
#[derive(Clone)]
pub struct EventReactor {
    shared: Arc<Shared>,
    _handles: Arc<Handles>,
}

impl fmt::Debug for EventReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReactor")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for EventReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReactor {
    /// Creates a reactor with default settings.
    #[must_use]
    pub fn new() -> Self {
        ReactorBuilder::new().build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    /// Returns the reactor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Starts the dispatch thread. Opening a running reactor is a no-op.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed, or
    /// `ReactorError::Spawn` if the thread cannot be started.
    pub fn open(&self) -> Result<(), ReactorError> {
        match self.shared.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => return Err(ReactorError::Closed),
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.state.store(STATE_IDLE, Ordering::Release);
                ReactorError::Spawn(e.to_string())
            })?;
        *self.shared.dispatch_thread.lock() = Some(handle);
        Ok(())
    }

    /// Stops dispatching, drops pending timers, queued events and
    /// subscriptions, and rejects further posts.
    ///
    /// Called from a handler, the current dispatch completes first.
    pub fn close(&self) {
        if self.shared.shutdown() {
            info!(reactor = %self.shared.name, "event reactor closed");
        }
    }

    /// Returns true while the dispatch thread runs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Returns true once the reactor has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns true if called from this reactor's dispatch thread.
    #[must_use]
    pub fn is_reactor_thread(&self) -> bool {
        self.shared.on_dispatch_thread()
    }

    /// Registers a handler for a topic.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Result<Subscription, ReactorError>
    where
        F: FnMut(&Event) -> HandlerResult + Send + 'static,
    {
        if self.shared.is_closed() {
            return Err(ReactorError::Closed);
        }
        let subscriber = Arc::new(Subscriber {
            id: self.shared.next_id(),
            topic,
            active: AtomicBool::new(true),
            handler: Mutex::new(Box::new(handler)),
        });
        self.shared
            .subscribers
            .lock()
            .entry(topic)
            .or_default()
            .push(Arc::clone(&subscriber));
        trace!(%topic, "subscribed");
        Ok(Subscription {
            subscriber,
            owner: Arc::downgrade(&self.shared),
        })
    }

    /// Enqueues an event for asynchronous delivery. Never blocks.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed.
    pub fn post(&self, topic: Topic, payload: Payload) -> Result<(), ReactorError> {
        if self.shared.is_closed() {
            return Err(ReactorError::Closed);
        }
        self.shared
            .commands
            .send(Command::Post(Event::new(topic, payload)))
            .map_err(|_| ReactorError::Closed)
    }

    /// Posts `payload` to `topic` every `interval`, starting one interval from now.
    ///
    /// # Errors
    /// Returns `ReactorError::InvalidInterval` for a zero interval, or
    /// `ReactorError::Closed` if the reactor was closed.
    pub fn post_at_interval(
        &self,
        topic: Topic,
        payload: Payload,
        interval: Duration,
    ) -> Result<TimerSchedule, ReactorError> {
        self.schedule(topic, payload, interval, true)
    }

    /// Posts `payload` to `topic` once after `delay`.
    ///
    /// # Errors
    /// Returns `ReactorError::InvalidInterval` for a zero delay, or
    /// `ReactorError::Closed` if the reactor was closed.
    pub fn post_after(
        &self,
        topic: Topic,
        payload: Payload,
        delay: Duration,
    ) -> Result<TimerSchedule, ReactorError> {
        self.schedule(topic, payload, delay, false)
    }

    fn schedule(
        &self,
        topic: Topic,
        payload: Payload,
        interval: Duration,
        repeat: bool,
    ) -> Result<TimerSchedule, ReactorError> {
        if interval.is_zero() {
            return Err(ReactorError::InvalidInterval);
        }
        if self.shared.is_closed() {
            return Err(ReactorError::Closed);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            due: Instant::now() + interval,
            id: self.shared.next_id(),
            event: Event::new(topic, payload),
            interval: repeat.then_some(interval),
            cancelled: Arc::clone(&cancelled),
        };
        self.shared
            .commands
            .send(Command::Schedule(entry))
            .map_err(|_| ReactorError::Closed)?;
        Ok(TimerSchedule { topic, cancelled })
    }

    /// Returns the number of active subscribers of a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.shared
            .subscribers
            .lock()
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::EventKind;
    use crossbeam_channel::bounded;
    use fixp_core::error::SessionError;
    use fixp_core::types::SessionId;

    const WAIT: Duration = Duration::from_secs(2);

    fn topic(kind: EventKind) -> Topic {
        Topic::new(SessionId::generate(), kind)
    }

    fn open_reactor() -> EventReactor {
        let reactor = EventReactor::builder().with_name("test-reactor").build();
        reactor.open().unwrap();
        reactor
    }

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let reactor = open_reactor();
        let t = topic(EventKind::SessionReady);
        let (tx, rx) = bounded(8);

        for n in 0..3 {
            let tx = tx.clone();
            reactor
                .subscribe(t, move |_| {
                    tx.send(n).unwrap();
                    Ok(())
                })
                .unwrap();
        }
        reactor.post(t, Payload::Empty).unwrap();

        let order: Vec<i32> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
        reactor.close();
    }

    #[test]
    fn test_handlers_run_on_dispatch_thread() {
        let reactor = open_reactor();
        let t = topic(EventKind::FrameReceived);
        let (tx, rx) = bounded(1);
        let handle = reactor.clone();
        reactor
            .subscribe(t, move |_| {
                tx.send(handle.is_reactor_thread()).unwrap();
                Ok(())
            })
            .unwrap();

        let poster = reactor.clone();
        thread::spawn(move || poster.post(t, Payload::Empty).unwrap())
            .join()
            .unwrap();

        assert!(rx.recv_timeout(WAIT).unwrap());
        assert!(!reactor.is_reactor_thread());
        reactor.close();
    }

    #[test]
    fn test_unsubscribe_from_own_handler() {
        let reactor = open_reactor();
        let t = topic(EventKind::SessionReady);
        let (tx, rx) = bounded(8);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let own = Arc::clone(&slot);
        let subscription = reactor
            .subscribe(t, move |_| {
                tx.send(()).unwrap();
                if let Some(sub) = own.lock().as_ref() {
                    assert!(sub.unsubscribe());
                }
                Ok(())
            })
            .unwrap();
        *slot.lock() = Some(subscription.clone());

        reactor.post(t, Payload::Empty).unwrap();
        reactor.post(t, Payload::Empty).unwrap();
        rx.recv_timeout(WAIT).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!subscription.is_active());
        assert!(!subscription.unsubscribe());
        assert_eq!(reactor.subscriber_count(&t), 0);
        reactor.close();
    }

    #[test]
    fn test_handler_fault_is_isolated() {
        let (fault_tx, fault_rx) = bounded(4);
        let reactor = EventReactor::builder()
            .with_exception_consumer(move |fault| {
                fault_tx.send(fault.clone()).unwrap();
            })
            .build();
        reactor.open().unwrap();

        let t = topic(EventKind::SessionSuspended);
        let (tx, rx) = bounded(4);
        reactor
            .subscribe(t, |_| Err(SessionError::Abandoned.into()))
            .unwrap();
        reactor.subscribe(t, |_| panic!("boom")).unwrap();
        let after = tx.clone();
        reactor
            .subscribe(t, move |_| {
                after.send("third").unwrap();
                Ok(())
            })
            .unwrap();

        let other = topic(EventKind::SessionReady);
        reactor
            .subscribe(other, move |_| {
                tx.send("other").unwrap();
                Ok(())
            })
            .unwrap();

        reactor.post(t, Payload::Empty).unwrap();
        reactor.post(other, Payload::Empty).unwrap();

        let first = fault_rx.recv_timeout(WAIT).unwrap();
        assert!(!first.panicked);
        let second = fault_rx.recv_timeout(WAIT).unwrap();
        assert!(second.panicked);
        assert_eq!(second.reason, "boom");
        assert_eq!(second.to_session_fault().kind, FaultKind::Handler);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "third");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "other");
        reactor.close();
    }

    #[test]
    fn test_interval_timer_repeats_until_cancelled() {
        let reactor = open_reactor();
        let t = topic(EventKind::Heartbeat);
        let (tx, rx) = bounded(64);
        reactor
            .subscribe(t, move |_| {
                let _ = tx.try_send(Instant::now());
                Ok(())
            })
            .unwrap();

        let start = Instant::now();
        let timer = reactor
            .post_at_interval(t, Payload::Empty, Duration::from_millis(20))
            .unwrap();
        let first = rx.recv_timeout(WAIT).unwrap();
        assert!(first.duration_since(start) >= Duration::from_millis(20));
        rx.recv_timeout(WAIT).unwrap();
        rx.recv_timeout(WAIT).unwrap();

        assert!(timer.cancel());
        assert!(!timer.cancel());
        while rx.recv_timeout(Duration::from_millis(60)).is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(80)).is_err());
        reactor.close();
    }

    #[test]
    fn test_timer_cancels_itself_from_handler() {
        let reactor = open_reactor();
        let t = topic(EventKind::PeerHeartbeat);
        let (tx, rx) = bounded(16);
        let slot: Arc<Mutex<Option<TimerSchedule>>> = Arc::new(Mutex::new(None));
        let own = Arc::clone(&slot);
        reactor
            .subscribe(t, move |_| {
                tx.send(()).unwrap();
                if let Some(timer) = own.lock().as_ref() {
                    timer.cancel();
                }
                Ok(())
            })
            .unwrap();
        *slot.lock() = Some(
            reactor
                .post_at_interval(t, Payload::Empty, Duration::from_millis(10))
                .unwrap(),
        );

        rx.recv_timeout(WAIT).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        reactor.close();
    }

    #[test]
    fn test_one_shot_timer_fires_once() {
        let reactor = open_reactor();
        let t = topic(EventKind::PeerTerminated);
        let (tx, rx) = bounded(4);
        reactor
            .subscribe(t, move |event| {
                tx.send(event.payload.clone()).unwrap();
                Ok(())
            })
            .unwrap();

        let timer = reactor
            .post_after(t, Payload::Closed, Duration::from_millis(15))
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Payload::Closed);
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
        assert!(timer.is_cancelled());
        reactor.close();
    }

    #[test]
    fn test_zero_interval_rejected() {
        let reactor = EventReactor::new();
        assert_eq!(
            reactor
                .post_at_interval(topic(EventKind::Heartbeat), Payload::Empty, Duration::ZERO)
                .unwrap_err(),
            ReactorError::InvalidInterval
        );
    }

    #[test]
    fn test_close_rejects_further_work() {
        let reactor = open_reactor();
        let t = topic(EventKind::SessionReady);
        reactor.subscribe(t, |_| Ok(())).unwrap();
        reactor.close();

        assert!(reactor.is_closed());
        assert_eq!(reactor.subscriber_count(&t), 0);
        assert_eq!(
            reactor.post(t, Payload::Empty).unwrap_err(),
            ReactorError::Closed
        );
        assert!(reactor.subscribe(t, |_| Ok(())).is_err());
        assert_eq!(reactor.open().unwrap_err(), ReactorError::Closed);
    }

    #[test]
    fn test_posts_before_open_are_delivered() {
        let reactor = EventReactor::new();
        let t = topic(EventKind::SessionReady);
        let (tx, rx) = bounded(1);
        reactor
            .subscribe(t, move |_| {
                tx.send(()).unwrap();
                Ok(())
            })
            .unwrap();
        reactor.post(t, Payload::Empty).unwrap();
        reactor.open().unwrap();
        rx.recv_timeout(WAIT).unwrap();
        reactor.close();
    }

    #[test]
    fn test_independent_reactors() {
        let first = open_reactor();
        let second = open_reactor();
        let t = topic(EventKind::SessionReady);
        let (tx, rx) = bounded(2);
        first
            .subscribe(t, move |_| {
                tx.send(()).unwrap();
                Ok(())
            })
            .unwrap();

        second.post(t, Payload::Empty).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        first.post(t, Payload::Empty).unwrap();
        rx.recv_timeout(WAIT).unwrap();

        first.close();
        second.close();
    }

    #[test]
    fn test_dropping_last_handle_stops_thread() {
        let reactor = open_reactor();
        let t = topic(EventKind::SessionReady);
        let (tx, rx) = bounded(1);
        let subscription = reactor
            .subscribe(t, move |_| {
                tx.send(()).unwrap();
                Ok(())
            })
            .unwrap();
        let shared = Arc::downgrade(&reactor.shared);

        let other = reactor.clone();
        drop(reactor);
        assert!(other.is_open());
        other.post(t, Payload::Empty).unwrap();
        rx.recv_timeout(WAIT).unwrap();

        drop(other);
        assert!(shared.upgrade().is_none());
        assert!(!subscription.is_active());
        assert!(!subscription.unsubscribe());
    }
}
