/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! One-shot completions fed by session events.
//!
//! A bridge subscribes to its session's topics when created, completes on the
//! first relevant event, and cancels its subscriptions. Later events are
//! ignored. Waiting with a timeout cancels the subscriptions on expiry and
//! leaves the session untouched.

use fixp_core::error::{ReactorError, SessionError};
use fixp_core::types::{FaultKind, SessionFault, SessionId};
use fixp_reactor::{Event, EventKind, EventReactor, Payload, Subscription, Topic};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot::{self, Receiver, Sender};

type Outcome<T> = Result<T, SessionError>;

struct Bridge<T> {
    /// Taken exactly once, by the first completion or by an expired wait.
    result: Mutex<Option<Sender<Outcome<T>>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T> Bridge<T> {
    fn new(result: Sender<Outcome<T>>) -> Self {
        Self {
            result: Mutex::new(Some(result)),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn complete(&self, result: Outcome<T>) -> bool {
        {
            let mut slot = self.result.lock();
            let Some(sender) = slot.take() else {
                return false;
            };
            // sent under the lock so an expiring waiter always finds it
            let _ = sender.send(result);
        }
        self.cancel();
        true
    }

    /// Closes the bridge after a wait timed out. Returns false if a result
    /// was delivered first.
    fn expire(&self) -> bool {
        let expired = self.result.lock().take().is_some();
        if expired {
            self.cancel();
        }
        expired
    }

    fn cancel(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    fn is_done(&self) -> bool {
        self.result.lock().is_none()
    }
}

fn attach<T, F>(
    bridge: &Arc<Bridge<T>>,
    reactor: &EventReactor,
    topic: Topic,
    map: F,
) -> Result<(), ReactorError>
where
    T: Send + 'static,
    F: Fn(&Event) -> Option<Outcome<T>> + Send + 'static,
{
    let weak: Weak<Bridge<T>> = Arc::downgrade(bridge);
    let subscription = reactor.subscribe(topic, move |event| {
        if let Some(bridge) = weak.upgrade()
            && let Some(result) = map(event)
        {
            bridge.complete(result);
        }
        Ok(())
    })?;
    if bridge.is_done() {
        subscription.unsubscribe();
    } else {
        bridge.subscriptions.lock().push(subscription);
    }
    Ok(())
}

fn terminated_fault(payload: &Payload) -> SessionFault {
    match payload {
        Payload::Fault(fault) => fault.clone(),
        _ => SessionFault::new(
            FaultKind::ProtocolViolation,
            "session terminated before it was established",
        ),
    }
}

async fn wait_on<T>(
    bridge: &Bridge<T>,
    receiver: &mut Receiver<Outcome<T>>,
    timeout: Duration,
) -> Outcome<T> {
    let start = Instant::now();
    let waited = tokio::time::timeout(timeout, &mut *receiver).await;
    match waited {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(SessionError::Abandoned),
        Err(_) if bridge.expire() => Err(SessionError::Timeout {
            waited_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
        // completed between the timeout and the expiry
        Err(_) => receiver.try_recv().unwrap_or(Err(SessionError::Abandoned)),
    }
}

/// Drives `wait_on` to completion from synchronous code.
fn block_on_wait<T>(
    bridge: &Bridge<T>,
    receiver: &mut Receiver<Outcome<T>>,
    timeout: Duration,
) -> Outcome<T> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|_| SessionError::Abandoned)?;
    runtime.block_on(wait_on(bridge, receiver, timeout))
}

/// Completes when a session reaches Established.
///
/// Fails with the fault if the session terminates first.
pub struct SessionReadyFuture {
    bridge: Arc<Bridge<SessionId>>,
    receiver: Receiver<Outcome<SessionId>>,
}

impl SessionReadyFuture {
    /// Subscribes to `session_id`'s `SESSION_READY` and `SESSION_TERMINATED`
    /// topics on `reactor`.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed.
    pub fn new(reactor: &EventReactor, session_id: SessionId) -> Result<Self, ReactorError> {
        let (tx, receiver) = oneshot::channel();
        let bridge = Arc::new(Bridge::new(tx));
        attach(
            &bridge,
            reactor,
            Topic::new(session_id, EventKind::SessionReady),
            move |event| match event.payload {
                Payload::Ready(id) => Some(Ok(id)),
                _ => Some(Ok(session_id)),
            },
        )?;
        attach(
            &bridge,
            reactor,
            Topic::new(session_id, EventKind::SessionTerminated),
            |event| Some(Err(SessionError::Faulted(terminated_fault(&event.payload)))),
        )?;
        Ok(Self { bridge, receiver })
    }

    pub(crate) fn resolve(&self, result: Result<SessionId, SessionError>) -> bool {
        self.bridge.complete(result)
    }

    /// Returns true once completed or cancelled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bridge.is_done()
    }

    /// Blocks until the session is ready or `timeout` elapses.
    ///
    /// Must not be called from within an async runtime; use
    /// [`wait_async`](Self::wait_async) there.
    ///
    /// # Errors
    /// Returns `SessionError::Faulted` if the session terminated,
    /// `SessionError::Timeout` on expiry, or `SessionError::Abandoned`.
    pub fn wait(mut self, timeout: Duration) -> Result<SessionId, SessionError> {
        block_on_wait(&self.bridge, &mut self.receiver, timeout)
    }

    /// Awaits readiness without blocking the async runtime.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    pub async fn wait_async(mut self, timeout: Duration) -> Result<SessionId, SessionError> {
        wait_on(&self.bridge, &mut self.receiver, timeout).await
    }
}

impl fmt::Debug for SessionReadyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReadyFuture")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Drop for SessionReadyFuture {
    fn drop(&mut self) {
        self.bridge.cancel();
    }
}

/// Completes when a session reaches Terminated.
///
/// Succeeds on a graceful end and fails with the fault otherwise.
pub struct SessionTerminatedFuture {
    bridge: Arc<Bridge<()>>,
    receiver: Receiver<Outcome<()>>,
}

impl SessionTerminatedFuture {
    /// Subscribes to `session_id`'s `SESSION_TERMINATED` topic on `reactor`.
    ///
    /// # Errors
    /// Returns `ReactorError::Closed` if the reactor was closed.
    pub fn new(reactor: &EventReactor, session_id: SessionId) -> Result<Self, ReactorError> {
        let (tx, receiver) = oneshot::channel();
        let bridge = Arc::new(Bridge::new(tx));
        attach(
            &bridge,
            reactor,
            Topic::new(session_id, EventKind::SessionTerminated),
            |event| match &event.payload {
                Payload::Fault(fault) => Some(Err(SessionError::Faulted(fault.clone()))),
                _ => Some(Ok(())),
            },
        )?;
        Ok(Self { bridge, receiver })
    }

    pub(crate) fn resolve(&self, result: Result<(), SessionError>) -> bool {
        self.bridge.complete(result)
    }

    /// Returns true once completed or cancelled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bridge.is_done()
    }

    /// Blocks until the session terminates or `timeout` elapses.
    ///
    /// Must not be called from within an async runtime; use
    /// [`wait_async`](Self::wait_async) there.
    ///
    /// # Errors
    /// Returns `SessionError::Faulted` if a fault ended the session,
    /// `SessionError::Timeout` on expiry, or `SessionError::Abandoned`.
    pub fn wait(mut self, timeout: Duration) -> Result<(), SessionError> {
        block_on_wait(&self.bridge, &mut self.receiver, timeout)
    }

    /// Awaits termination without blocking the async runtime.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    pub async fn wait_async(mut self, timeout: Duration) -> Result<(), SessionError> {
        wait_on(&self.bridge, &mut self.receiver, timeout).await
    }
}

impl fmt::Debug for SessionTerminatedFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTerminatedFuture")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Drop for SessionTerminatedFuture {
    fn drop(&mut self) {
        self.bridge.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixp_core::types::TerminationCode;

    const WAIT: Duration = Duration::from_secs(2);

    fn open_reactor() -> EventReactor {
        let reactor = EventReactor::new();
        reactor.open().unwrap();
        reactor
    }

    #[test]
    fn test_ready_completes_once() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let ready = SessionReadyFuture::new(&reactor, id).unwrap();
        let topic = Topic::new(id, EventKind::SessionReady);

        reactor.post(topic, Payload::Ready(id)).unwrap();
        reactor.post(topic, Payload::Ready(id)).unwrap();

        assert_eq!(ready.wait(WAIT).unwrap(), id);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reactor.subscriber_count(&topic), 0);
        reactor.close();
    }

    #[test]
    fn test_ready_fails_on_termination() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let ready = SessionReadyFuture::new(&reactor, id).unwrap();
        let fault = SessionFault::new(FaultKind::Authentication, "rejected")
            .with_code(TerminationCode::Unauthorized);
        reactor
            .post(
                Topic::new(id, EventKind::SessionTerminated),
                Payload::Fault(fault.clone()),
            )
            .unwrap();

        assert_eq!(ready.wait(WAIT), Err(SessionError::Faulted(fault)));
        reactor.close();
    }

    #[test]
    fn test_timeout_cancels_subscriptions() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let terminated = SessionTerminatedFuture::new(&reactor, id).unwrap();
        let topic = Topic::new(id, EventKind::SessionTerminated);
        assert_eq!(reactor.subscriber_count(&topic), 1);

        assert!(matches!(
            terminated.wait(Duration::from_millis(30)),
            Err(SessionError::Timeout { .. })
        ));
        assert_eq!(reactor.subscriber_count(&topic), 0);
        reactor.close();
    }

    #[test]
    fn test_terminated_graceful_and_faulted() {
        let reactor = open_reactor();
        let graceful_id = SessionId::generate();
        let graceful = SessionTerminatedFuture::new(&reactor, graceful_id).unwrap();
        reactor
            .post(
                Topic::new(graceful_id, EventKind::SessionTerminated),
                Payload::Closed,
            )
            .unwrap();
        assert_eq!(graceful.wait(WAIT), Ok(()));

        let faulted_id = SessionId::generate();
        let faulted = SessionTerminatedFuture::new(&reactor, faulted_id).unwrap();
        let fault = SessionFault::new(FaultKind::ProtocolViolation, "bad handshake");
        reactor
            .post(
                Topic::new(faulted_id, EventKind::SessionTerminated),
                Payload::Fault(fault.clone()),
            )
            .unwrap();
        assert_eq!(faulted.wait(WAIT), Err(SessionError::Faulted(fault)));
        reactor.close();
    }

    #[test]
    fn test_direct_resolution_wins_once() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let ready = SessionReadyFuture::new(&reactor, id).unwrap();
        assert!(ready.resolve(Ok(id)));
        assert!(!ready.resolve(Err(SessionError::Abandoned)));
        assert_eq!(ready.wait(WAIT), Ok(id));
        reactor.close();
    }

    #[tokio::test]
    async fn test_wait_async() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let ready = SessionReadyFuture::new(&reactor, id).unwrap();
        reactor
            .post(Topic::new(id, EventKind::SessionReady), Payload::Ready(id))
            .unwrap();
        assert_eq!(ready.wait_async(WAIT).await, Ok(id));
        reactor.close();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_wait_async_times_out_on_runtime_thread() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let topic = Topic::new(id, EventKind::SessionTerminated);
        let first = SessionTerminatedFuture::new(&reactor, id).unwrap();
        let second = SessionTerminatedFuture::new(&reactor, id).unwrap();

        let (a, b) = tokio::join!(
            first.wait_async(Duration::from_millis(30)),
            second.wait_async(Duration::from_millis(30)),
        );
        assert!(matches!(a, Err(SessionError::Timeout { .. })));
        assert!(matches!(b, Err(SessionError::Timeout { .. })));
        assert_eq!(reactor.subscriber_count(&topic), 0);
        reactor.close();
    }

    #[test]
    fn test_completion_racing_expiry_is_kept() {
        let (tx, mut rx) = oneshot::channel();
        let bridge = Bridge::new(tx);
        assert!(bridge.complete(Ok(7_u64)));
        assert!(!bridge.expire());
        assert!(!bridge.complete(Err(SessionError::Abandoned)));
        assert_eq!(rx.try_recv().unwrap(), Ok(7));
    }

    #[test]
    fn test_wait_after_resolution_with_zero_timeout() {
        let reactor = open_reactor();
        let id = SessionId::generate();
        let ready = SessionReadyFuture::new(&reactor, id).unwrap();
        assert!(ready.resolve(Ok(id)));
        assert_eq!(ready.wait(Duration::ZERO), Ok(id));
        reactor.close();
    }
}
