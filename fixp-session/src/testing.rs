/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Transport double for unit tests.

use bytes::Bytes;
use fixp_core::error::TransportError;
use fixp_transport::{BufferSupplier, Transport, TransportConsumer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records written frames and lets a test drive consumer callbacks.
#[derive(Default)]
pub struct RecordingTransport {
    written: Mutex<Vec<Bytes>>,
    consumer: Mutex<Option<Arc<dyn TransportConsumer>>>,
    open: AtomicBool,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::Release);
    }

    pub fn connect(&self) {
        if let Some(consumer) = self.consumer.lock().clone() {
            consumer.connected();
        }
    }

    pub fn deliver(&self, frame: Bytes) {
        if let Some(consumer) = self.consumer.lock().clone() {
            consumer.accept(frame);
        }
    }

    pub fn disconnect(&self) {
        if let Some(consumer) = self.consumer.lock().clone() {
            consumer.disconnected();
        }
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("written", &self.written.lock().len())
            .finish()
    }
}

impl Transport for RecordingTransport {
    fn open(
        &self,
        _buffers: Arc<dyn BufferSupplier>,
        consumer: Arc<dyn TransportConsumer>,
    ) -> Result<(), TransportError> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyOpen);
        }
        *self.consumer.lock() = Some(consumer);
        Ok(())
    }

    fn write(&self, frame: &[u8]) -> Result<usize, TransportError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.written.lock().push(Bytes::copy_from_slice(frame));
        Ok(frame.len())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
