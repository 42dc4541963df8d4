/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Transport capability traits.
//!
//! A [`Transport`] moves complete frames between two peers. It reports
//! connection changes and inbound frames to a [`TransportConsumer`] from its
//! own I/O thread, and borrows working buffers from a [`BufferSupplier`].

use bytes::{Bytes, BytesMut};
use crossbeam_queue::ArrayQueue;
use fixp_core::error::TransportError;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Default capacity of buffers handed out by the suppliers in this module.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Receiver of transport callbacks.
///
/// Callbacks run on the transport's I/O thread and must hand work off rather
/// than block.
pub trait TransportConsumer: Send + Sync {
    /// The transport connected to its peer.
    fn connected(&self);

    /// The transport lost its peer or was closed.
    fn disconnected(&self);

    /// A complete inbound frame arrived.
    fn accept(&self, frame: Bytes);
}

/// Scoped source of working buffers.
pub trait BufferSupplier: Send + Sync {
    /// Hands out an empty buffer.
    fn acquire(&self) -> BytesMut;

    /// Returns a buffer obtained from [`acquire`](Self::acquire).
    fn release(&self, buffer: BytesMut);
}

/// Bidirectional frame transport.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Starts the transport. `consumer.connected()` follows asynchronously
    /// once the peer is reachable.
    ///
    /// # Errors
    /// Returns `TransportError::AlreadyOpen` if called twice, or an I/O error
    /// if the transport cannot start.
    fn open(
        &self,
        buffers: Arc<dyn BufferSupplier>,
        consumer: Arc<dyn TransportConsumer>,
    ) -> Result<(), TransportError>;

    /// Writes one complete frame.
    ///
    /// Returns the number of bytes accepted.
    ///
    /// # Errors
    /// Returns `TransportError` if the transport is not open or the peer is gone.
    fn write(&self, frame: &[u8]) -> Result<usize, TransportError>;

    /// Closes the transport. Closing twice is a no-op.
    fn close(&self);

    /// Returns true between a successful open and close.
    fn is_open(&self) -> bool;
}

/// Buffer borrowed from a [`BufferSupplier`], released when dropped.
pub struct BufferLease<'a> {
    supplier: &'a dyn BufferSupplier,
    buffer: BytesMut,
}

impl<'a> BufferLease<'a> {
    /// Acquires a buffer from `supplier`.
    #[must_use]
    pub fn acquire(supplier: &'a dyn BufferSupplier) -> Self {
        Self {
            buffer: supplier.acquire(),
            supplier,
        }
    }
}

impl Deref for BufferLease<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        self.supplier.release(std::mem::take(&mut self.buffer));
    }
}

/// Allocates a fresh buffer on every acquire.
#[derive(Debug, Clone, Copy)]
pub struct HeapBufferSupplier {
    capacity: usize,
}

impl HeapBufferSupplier {
    /// Creates a supplier of buffers with the given initial capacity.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for HeapBufferSupplier {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl BufferSupplier for HeapBufferSupplier {
    fn acquire(&self) -> BytesMut {
        BytesMut::with_capacity(self.capacity)
    }

    fn release(&self, _buffer: BytesMut) {}
}

/// Recycles released buffers through a bounded pool.
pub struct PooledBufferSupplier {
    pool: ArrayQueue<BytesMut>,
    capacity: usize,
}

impl PooledBufferSupplier {
    /// Creates a pool holding at most `pooled` idle buffers.
    ///
    /// # Panics
    /// Panics if `pooled` is zero.
    #[must_use]
    pub fn new(pooled: usize, capacity: usize) -> Self {
        Self {
            pool: ArrayQueue::new(pooled),
            capacity,
        }
    }

    /// Returns the number of idle buffers in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.pool.len()
    }
}

impl Default for PooledBufferSupplier {
    fn default() -> Self {
        Self::new(16, DEFAULT_BUFFER_CAPACITY)
    }
}

impl fmt::Debug for PooledBufferSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBufferSupplier")
            .field("idle", &self.pool.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl BufferSupplier for PooledBufferSupplier {
    fn acquire(&self) -> BytesMut {
        self.pool
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let _ = self.pool.push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_lease_returns_buffer_to_pool() {
        let pool = PooledBufferSupplier::new(2, 64);
        {
            let mut lease = BufferLease::acquire(&pool);
            lease.put_slice(b"abc");
            assert_eq!(&lease[..], b"abc");
        }
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 3);
    }

    #[test]
    fn test_lease_released_on_panic() {
        let pool = PooledBufferSupplier::new(2, 64);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = BufferLease::acquire(&pool);
            panic!("fault while holding a buffer");
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_pool_bounded() {
        let pool = PooledBufferSupplier::new(1, 8);
        pool.release(BytesMut::new());
        pool.release(BytesMut::new());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_heap_supplier_capacity() {
        let supplier = HeapBufferSupplier::new(128);
        assert!(supplier.acquire().capacity() >= 128);
    }
}
