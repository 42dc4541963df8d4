/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! In-process transport pair.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Bytes written to one
//! end are read by the other end's reader thread, reassembled into frames by
//! [`FrameCodec`], and handed to its consumer. Closing either end disconnects
//! both.

use crate::codec::FrameCodec;
use crate::transport::{BufferLease, BufferSupplier, Transport, TransportConsumer};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use fixp_core::error::TransportError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

enum Segment {
    Data(Bytes),
    Hangup,
}

struct Reader {
    handle: JoinHandle<()>,
    stop: Sender<()>,
}

/// One end of an in-process byte channel.
pub struct MemoryTransport {
    name: String,
    outbound: Sender<Segment>,
    inbound: Receiver<Segment>,
    link_up: Arc<AtomicBool>,
    open: AtomicBool,
    chunk_size: Option<usize>,
    max_frame_size: usize,
    reader: Mutex<Option<Reader>>,
    reader_thread: Mutex<Option<ThreadId>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        let link_up = Arc::new(AtomicBool::new(true));
        (
            Self::end("memory-a", a_tx, b_rx, Arc::clone(&link_up)),
            Self::end("memory-b", b_tx, a_rx, link_up),
        )
    }

    fn end(
        name: &str,
        outbound: Sender<Segment>,
        inbound: Receiver<Segment>,
        link_up: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.to_string(),
            outbound,
            inbound,
            link_up,
            open: AtomicBool::new(false),
            chunk_size: None,
            max_frame_size: FrameCodec::new().max_frame_size(),
            reader: Mutex::new(None),
            reader_thread: Mutex::new(None),
        }
    }

    /// Splits every write into segments of at most `size` bytes, so the
    /// reader sees partial frames.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Sets the largest frame the reader accepts.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Returns true while neither end has closed.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    fn hang_up(&self) {
        if self.link_up.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(Segment::Hangup);
        }
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("linked", &self.is_linked())
            .finish()
    }
}

impl Transport for MemoryTransport {
    fn open(
        &self,
        buffers: Arc<dyn BufferSupplier>,
        consumer: Arc<dyn TransportConsumer>,
    ) -> Result<(), TransportError> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyOpen);
        }
        if !self.is_linked() {
            self.open.store(false, Ordering::Release);
            return Err(TransportError::Closed);
        }

        let (stop, stopped) = bounded(1);
        let inbound = self.inbound.clone();
        let codec = FrameCodec::new().with_max_frame_size(self.max_frame_size);
        let link_up = Arc::clone(&self.link_up);
        let outbound = self.outbound.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-reader", self.name))
            .spawn(move || {
                read_loop(&name, codec, &inbound, &stopped, buffers.as_ref(), consumer.as_ref());
                if link_up.swap(false, Ordering::AcqRel) {
                    let _ = outbound.send(Segment::Hangup);
                }
                consumer.disconnected();
            })
            .map_err(|e| {
                self.open.store(false, Ordering::Release);
                TransportError::from(e)
            })?;

        *self.reader_thread.lock() = Some(handle.thread().id());
        *self.reader.lock() = Some(Reader { handle, stop });
        Ok(())
    }

    fn write(&self, frame: &[u8]) -> Result<usize, TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        if !self.is_linked() {
            return Err(TransportError::Closed);
        }

        let chunk = self.chunk_size.unwrap_or(frame.len()).max(1);
        for piece in frame.chunks(chunk) {
            self.outbound
                .send(Segment::Data(Bytes::copy_from_slice(piece)))
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(frame.len())
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.hang_up();

        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        let _ = reader.stop.send(());
        let on_reader = *self.reader_thread.lock() == Some(thread::current().id());
        if !on_reader && reader.handle.join().is_err() {
            warn!(transport = %self.name, "reader thread panicked");
        }
        debug!(transport = %self.name, "transport closed");
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(
    name: &str,
    mut codec: FrameCodec,
    inbound: &Receiver<Segment>,
    stopped: &Receiver<()>,
    buffers: &dyn BufferSupplier,
    consumer: &dyn TransportConsumer,
) {
    let mut pending = BufferLease::acquire(buffers);
    consumer.connected();

    loop {
        let segment = select! {
            recv(inbound) -> segment => segment,
            recv(stopped) -> _ => return,
        };
        match segment {
            Ok(Segment::Data(bytes)) => pending.extend_from_slice(&bytes),
            Ok(Segment::Hangup) | Err(_) => {
                debug!(transport = %name, "peer hung up");
                return;
            }
        }

        loop {
            match codec.decode(&mut pending) {
                Ok(Some(frame)) => consumer.accept(frame.freeze()),
                Ok(None) => break,
                Err(err) => {
                    warn!(transport = %name, error = %err, "dropping connection");
                    return;
                }
            }
        }
    }
}
