/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Error types for the FIXP session engine.
//!
//! This module provides a unified error hierarchy using `thiserror` for typed,
//! domain-specific errors across the reactor, transport, and session layers.

use crate::types::{SessionFault, SessionId};
use thiserror::Error;

/// Result type alias using [`FixpError`] as the error type.
pub type Result<T> = std::result::Result<T, FixpError>;

/// Top-level error type for all FIXP operations.
#[derive(Debug, Error)]
pub enum FixpError {
    /// Error during frame decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during frame encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error reported by a transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error in event reactor operations.
    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),

    /// I/O error from an underlying resource.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while decoding FIXP frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is shorter than a message header.
    #[error("incomplete frame: {available} bytes, header needs {needed}")]
    Incomplete {
        /// Bytes needed for the header.
        needed: usize,
        /// Bytes available in the buffer.
        available: usize,
    },

    /// Declared message length disagrees with the frame size.
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Actual frame length.
        actual: usize,
    },

    /// Declared message length is smaller than the header itself.
    #[error("invalid message length {0}")]
    InvalidLength(usize),

    /// Frame does not belong to the session schema.
    #[error("not a session message: schema {0}")]
    NotSessionMessage(u16),

    /// Unknown session template.
    #[error("unknown session template {0}")]
    UnknownTemplate(u16),

    /// Message block is shorter than the template requires.
    #[error("truncated template {template}: need {needed} bytes, have {available}")]
    Truncated {
        /// Template being decoded.
        template: u16,
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Flow type code is not one of the supported flows.
    #[error("unsupported flow type code {0}")]
    UnsupportedFlow(u8),

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum {max_size}")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

/// Errors that occur while encoding FIXP frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Frame would not fit the 16-bit length field.
    #[error("frame too large: {size} bytes exceeds maximum {max_size}")]
    FrameTooLarge {
        /// Size of the frame being encoded.
        size: usize,
        /// Maximum encodable size.
        max_size: usize,
    },

    /// Application frame does not carry a consistent header.
    #[error("malformed application frame: {0}")]
    MalformedFrame(String),
}

/// Errors in FIXP session layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is not in the correct state for the operation.
    #[error("invalid session state: expected {expected}, current {current}")]
    InvalidState {
        /// Expected state for the operation.
        expected: String,
        /// Current session state.
        current: String,
    },

    /// Operation requires a flow the session does not use.
    #[error("operation unsupported by {flow} flow")]
    UnsupportedByFlow {
        /// Flow type in use.
        flow: String,
    },

    /// Sender already emitted its end-of-stream marker.
    #[error("stream already finished for session {0}")]
    StreamFinished(SessionId),

    /// A fault ended or suspended the session.
    #[error("session faulted: {0}")]
    Faulted(SessionFault),

    /// Waiting for a completion timed out.
    #[error("timed out after {waited_ms} milliseconds")]
    Timeout {
        /// Elapsed wait in milliseconds.
        waited_ms: u64,
    },

    /// Completion source went away without a result.
    #[error("completion abandoned")]
    Abandoned,

    /// Session configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Peer numbering runs past the largest sequence number.
    #[error("sequence number overflow after {0}")]
    SequenceOverflow(u64),
}

/// Errors reported by transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport has not been opened.
    #[error("transport not open")]
    NotOpen,

    /// Transport was already opened.
    #[error("transport already open")]
    AlreadyOpen,

    /// Transport or its peer has been closed.
    #[error("transport closed")]
    Closed,

    /// Underlying I/O failure.
    #[error("transport i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors in event reactor operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReactorError {
    /// Reactor has been closed and rejects further work.
    #[error("reactor closed")]
    Closed,

    /// Timer interval must be greater than zero.
    #[error("invalid timer interval")]
    InvalidInterval,

    /// Dispatch thread could not be started.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(String),
}
