/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Tokio codec for FIXP frame boundaries.
//!
//! Frames are delimited by the little-endian `messageLength` at the start of
//! every header, which counts the whole frame including the header.

use bytes::{BufMut, Bytes, BytesMut};
use fixp_core::error::{DecodeError, TransportError};
use fixp_core::frame::{HEADER_LEN, MAX_FRAME_LEN, MessageHeader};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors that can occur during codec operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Stream carried an invalid frame boundary.
    #[error("framing error: {0}")]
    Framing(#[from] DecodeError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        Self::Io(err.to_string())
    }
}

/// Splits a byte stream into frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec accepting frames up to the 16-bit length limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_LEN,
        }
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Returns the maximum frame size.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_length(&self, length: usize) -> Result<(), DecodeError> {
        if length < HEADER_LEN {
            return Err(DecodeError::InvalidLength(length));
        }
        if length > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                size: length,
                max_size: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(length) = MessageHeader::peek_length(src) else {
            return Ok(None);
        };
        self.check_length(length)?;

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let declared = MessageHeader::peek_length(item).ok_or(DecodeError::Incomplete {
            needed: HEADER_LEN,
            available: item.len(),
        })?;
        self.check_length(declared)?;
        if declared != item.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: item.len(),
            }
            .into());
        }
        dst.reserve(item.len());
        dst.put_slice(item);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&[u8]>>::encode(self, &item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixp_core::frame::{SessionMessage, encode_application_frame};

    #[test]
    fn test_decode_splits_concatenated_frames() {
        let mut codec = FrameCodec::new();
        let first = SessionMessage::UnsequencedHeartbeat.encode().unwrap();
        let second = encode_application_frame(7, 100, 1, b"payload").unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(&first);
        buf.put_slice(&second);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_partial_frame() {
        let mut codec = FrameCodec::new();
        let frame = encode_application_frame(7, 100, 1, b"abcdef").unwrap();
        let mut buf = BytesMut::from(&frame[..1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frame[1..HEADER_LEN + 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frame[HEADER_LEN + 2..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_short_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[4u8, 0, 0, 0][..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(CodecError::Framing(DecodeError::InvalidLength(4)))
        );
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new().with_max_frame_size(32);
        let frame = encode_application_frame(7, 100, 1, &[0u8; 40]).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Framing(DecodeError::FrameTooLarge { size: 50, max_size: 32 }))
        ));
    }

    #[test]
    fn test_encode_checks_declared_length() {
        let mut codec = FrameCodec::new();
        let frame = encode_application_frame(7, 100, 1, b"xyz").unwrap();
        let mut dst = BytesMut::new();
        codec.encode(frame.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &frame[..]);

        let truncated = &frame[..frame.len() - 1];
        assert!(matches!(
            codec.encode(truncated, &mut dst),
            Err(CodecError::Framing(DecodeError::LengthMismatch { .. }))
        ));
    }
}
