/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Buffered ingestion stage between a transport and its consumer.
//!
//! [`BufferedTransportConsumer`] sits in front of another consumer. The
//! transport's I/O thread publishes callbacks into a bounded single-producer
//! single-consumer ring, and a drain thread replays them, in publish order, to
//! the downstream consumer. A full ring never drops a callback: the producer
//! waits according to its [`BackpressurePolicy`].

use crate::transport::TransportConsumer;
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;
use fixp_core::error::TransportError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tracing::{debug, warn};

const IDLE_PARK: Duration = Duration::from_millis(1);

/// How a producer waits for space in a full ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Busy-spin with exponential backoff.
    #[default]
    Spin,
    /// Yield the producer thread between attempts.
    Yield,
}

enum Signal {
    Connected,
    Frame(Bytes),
    Disconnected,
}

struct Ingest {
    ring: ArrayQueue<Signal>,
    downstream: Arc<dyn TransportConsumer>,
    policy: BackpressurePolicy,
    running: AtomicBool,
    drain: OnceLock<Thread>,
    stalls: AtomicU64,
}

impl Ingest {
    fn publish(&self, signal: Signal) {
        let mut pending = signal;
        let backoff = Backoff::new();
        loop {
            match self.ring.push(pending) {
                Ok(()) => break,
                Err(rejected) => {
                    if !self.running.load(Ordering::Acquire) {
                        warn!("ingestion stage stopped, callback discarded");
                        return;
                    }
                    self.stalls.fetch_add(1, Ordering::Relaxed);
                    pending = rejected;
                    self.wake();
                    match self.policy {
                        BackpressurePolicy::Spin => backoff.snooze(),
                        BackpressurePolicy::Yield => thread::yield_now(),
                    }
                }
            }
        }
        self.wake();
    }

    fn wake(&self) {
        if let Some(drain) = self.drain.get() {
            drain.unpark();
        }
    }

    fn deliver(&self, signal: Signal) {
        match signal {
            Signal::Connected => self.downstream.connected(),
            Signal::Frame(frame) => self.downstream.accept(frame),
            Signal::Disconnected => self.downstream.disconnected(),
        }
    }

    fn run(&self) {
        let _ = self.drain.set(thread::current());
        loop {
            while let Some(signal) = self.ring.pop() {
                self.deliver(signal);
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            thread::park_timeout(IDLE_PARK);
        }
        while let Some(signal) = self.ring.pop() {
            self.deliver(signal);
        }
    }
}

/// Transport consumer that decouples the I/O thread from its downstream.
pub struct BufferedTransportConsumer {
    ingest: Arc<Ingest>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedTransportConsumer {
    /// Starts a drain thread feeding `downstream` from a ring of `capacity`
    /// callbacks.
    ///
    /// # Errors
    /// Returns `TransportError::Io` for a zero capacity or if the drain thread
    /// cannot be started.
    pub fn new(
        downstream: Arc<dyn TransportConsumer>,
        capacity: usize,
        policy: BackpressurePolicy,
    ) -> Result<Self, TransportError> {
        if capacity == 0 {
            return Err(TransportError::Io(
                "ingestion ring capacity must be positive".to_string(),
            ));
        }
        let ingest = Arc::new(Ingest {
            ring: ArrayQueue::new(capacity),
            downstream,
            policy,
            running: AtomicBool::new(true),
            drain: OnceLock::new(),
            stalls: AtomicU64::new(0),
        });
        let worker = Arc::clone(&ingest);
        let handle = thread::Builder::new()
            .name("fixp-ingest".to_string())
            .spawn(move || worker.run())?;
        debug!(capacity, ?policy, "ingestion stage started");
        Ok(Self {
            ingest,
            drain: Mutex::new(Some(handle)),
        })
    }

    /// Returns how many times a producer found the ring full.
    #[must_use]
    pub fn stalls(&self) -> u64 {
        self.ingest.stalls.load(Ordering::Relaxed)
    }

    /// Returns the ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ingest.ring.capacity()
    }

    /// Delivers everything already published, then stops the drain thread.
    pub fn shutdown(&self) {
        if !self.ingest.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.ingest.wake();
        let Some(handle) = self.drain.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("ingestion drain thread panicked");
        }
    }
}

impl TransportConsumer for BufferedTransportConsumer {
    fn connected(&self) {
        self.ingest.publish(Signal::Connected);
    }

    fn disconnected(&self) {
        self.ingest.publish(Signal::Disconnected);
    }

    fn accept(&self, frame: Bytes) {
        self.ingest.publish(Signal::Frame(frame));
    }
}

impl fmt::Debug for BufferedTransportConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedTransportConsumer")
            .field("capacity", &self.capacity())
            .field("policy", &self.ingest.policy)
            .field("stalls", &self.stalls())
            .finish()
    }
}

impl Drop for BufferedTransportConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
