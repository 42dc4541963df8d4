/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP Transport
//!
//! Transport boundary of the FIXP session engine.
//!
//! This crate provides:
//! - **Capabilities**: `Transport`, `TransportConsumer`, and `BufferSupplier` traits
//! - **Codec**: Tokio codec splitting byte streams into frames
//! - **Memory transport**: Connected in-process pair for tests and co-located peers
//! - **Buffered ingestion**: Bounded SPSC stage with explicit backpressure

pub mod buffered;
pub mod codec;
pub mod memory;
pub mod transport;

pub use buffered::{BackpressurePolicy, BufferedTransportConsumer};
pub use codec::{CodecError, FrameCodec};
pub use memory::MemoryTransport;
pub use transport::{
    BufferLease, BufferSupplier, HeapBufferSupplier, PooledBufferSupplier, Transport,
    TransportConsumer,
};
