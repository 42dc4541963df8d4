/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Frame layout and session control messages.
//!
//! Every frame starts with a 10-byte little-endian header:
//!
//! ```text
//! +---------------+-------------+-------------+-----------+---------+
//! | messageLength | blockLength | templateId  | schemaId  | version |
//! |     u16       |    u16      |    u16      |   u16     |  u16    |
//! +---------------+-------------+-------------+-----------+---------+
//! ```
//!
//! `messageLength` covers the whole frame including the header. Frames whose
//! schema is [`SESSION_SCHEMA_ID`] are session control messages decoded into
//! [`SessionMessage`]; all other frames are application frames and are passed
//! through untouched.

use crate::error::{DecodeError, EncodeError};
use crate::types::{FlowType, SESSION_ID_LEN, SessionId, TerminationCode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 10;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Schema identifier reserved for session control messages.
pub const SESSION_SCHEMA_ID: u16 = 0xFF01;

/// Version of the session control schema.
pub const SESSION_SCHEMA_VERSION: u16 = 1;

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Whole frame length including this header.
    pub message_length: u16,
    /// Length of the fixed block following the header.
    pub block_length: u16,
    /// Template identifier within the schema.
    pub template_id: u16,
    /// Schema identifier.
    pub schema_id: u16,
    /// Schema version.
    pub version: u16,
}

impl MessageHeader {
    /// Reads the declared frame length from the start of a buffer.
    ///
    /// Returns `None` if fewer than two bytes are available.
    #[inline]
    #[must_use]
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        if buf.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([buf[0], buf[1]]) as usize)
    }

    /// Decodes the header of a complete frame.
    ///
    /// # Errors
    /// Returns `DecodeError` if the buffer is shorter than a header or the
    /// declared length does not match the frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::Incomplete {
                needed: HEADER_LEN,
                available: frame.len(),
            });
        }
        let mut buf = &frame[..HEADER_LEN];
        let header = Self {
            message_length: buf.get_u16_le(),
            block_length: buf.get_u16_le(),
            template_id: buf.get_u16_le(),
            schema_id: buf.get_u16_le(),
            version: buf.get_u16_le(),
        };
        let declared = header.message_length as usize;
        if declared < HEADER_LEN {
            return Err(DecodeError::InvalidLength(declared));
        }
        if declared != frame.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }
        Ok(header)
    }

    /// Writes this header to a buffer.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN);
        dst.put_u16_le(self.message_length);
        dst.put_u16_le(self.block_length);
        dst.put_u16_le(self.template_id);
        dst.put_u16_le(self.schema_id);
        dst.put_u16_le(self.version);
    }

    /// Returns true if the frame carries a session control message.
    #[inline]
    #[must_use]
    pub const fn is_session(&self) -> bool {
        self.schema_id == SESSION_SCHEMA_ID
    }
}

/// Session control message templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TemplateId {
    /// Client request to create a session.
    Negotiate = 1,
    /// Server acceptance of a session.
    Establish = 2,
    /// Termination with a reason code.
    Terminate = 3,
    /// Keepalive of unsequenced flows.
    UnsequencedHeartbeat = 4,
    /// Next sequence number of a sequenced flow; also its keepalive.
    Sequence = 5,
    /// Range of sequence numbers the receiver did not apply.
    NotApplied = 6,
    /// Start of a retransmitted range.
    Retransmission = 7,
    /// End-of-stream marker.
    FinishedSending = 8,
}

impl TryFrom<u16> for TemplateId {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Negotiate,
            2 => Self::Establish,
            3 => Self::Terminate,
            4 => Self::UnsequencedHeartbeat,
            5 => Self::Sequence,
            6 => Self::NotApplied,
            7 => Self::Retransmission,
            8 => Self::FinishedSending,
            other => return Err(DecodeError::UnknownTemplate(other)),
        })
    }
}

impl TemplateId {
    /// Fixed block length of the template.
    #[must_use]
    pub const fn block_length(self) -> usize {
        match self {
            Self::Negotiate | Self::Establish => SESSION_ID_LEN + 1 + 4 + 8,
            Self::Terminate => SESSION_ID_LEN + 1,
            Self::UnsequencedHeartbeat => 0,
            Self::Sequence | Self::FinishedSending => 8,
            Self::NotApplied | Self::Retransmission => 12,
        }
    }
}

/// Client request to create or re-establish a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiate {
    /// Client-generated session identifier.
    pub session_id: SessionId,
    /// Flow of the client's outbound direction.
    pub flow: FlowType,
    /// Client keepalive interval in milliseconds, zero if disabled.
    pub keepalive_ms: u32,
    /// Next sequence number the client will send.
    pub next_seq: u64,
    /// Opaque credentials presented to the authenticator.
    pub credentials: Bytes,
}

/// Server acceptance of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Establish {
    /// Echoed session identifier.
    pub session_id: SessionId,
    /// Flow of the server's outbound direction.
    pub flow: FlowType,
    /// Server keepalive interval in milliseconds, zero if disabled.
    pub keepalive_ms: u32,
    /// Next sequence number the server will send.
    pub next_seq: u64,
}

/// Session termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminate {
    /// Session being terminated.
    pub session_id: SessionId,
    /// Reason code.
    pub code: TerminationCode,
}

/// Decoded session control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// Negotiate request.
    Negotiate(Negotiate),
    /// Establish acceptance.
    Establish(Establish),
    /// Terminate.
    Terminate(Terminate),
    /// Keepalive without sequence information.
    UnsequencedHeartbeat,
    /// Next sequence number announcement.
    Sequence {
        /// Sequence number of the next application message.
        next_seq: u64,
    },
    /// Not-applied report.
    NotApplied {
        /// First sequence number not applied.
        from_seq: u64,
        /// Number of messages not applied.
        count: u32,
    },
    /// Retransmission header.
    Retransmission {
        /// Sequence number of the first retransmitted message.
        next_seq: u64,
        /// Number of retransmitted messages that follow.
        count: u32,
    },
    /// End-of-stream marker.
    FinishedSending {
        /// Last sequence number sent, zero for unsequenced flows.
        last_seq: u64,
    },
}

impl SessionMessage {
    /// Returns the template of this message.
    #[must_use]
    pub const fn template(&self) -> TemplateId {
        match self {
            Self::Negotiate(_) => TemplateId::Negotiate,
            Self::Establish(_) => TemplateId::Establish,
            Self::Terminate(_) => TemplateId::Terminate,
            Self::UnsequencedHeartbeat => TemplateId::UnsequencedHeartbeat,
            Self::Sequence { .. } => TemplateId::Sequence,
            Self::NotApplied { .. } => TemplateId::NotApplied,
            Self::Retransmission { .. } => TemplateId::Retransmission,
            Self::FinishedSending { .. } => TemplateId::FinishedSending,
        }
    }

    /// Encodes this message as a complete frame.
    ///
    /// # Errors
    /// Returns `EncodeError::FrameTooLarge` if the credentials push the frame
    /// past the 16-bit length limit.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let template = self.template();
        let block_length = template.block_length();
        let var_length = match self {
            Self::Negotiate(n) => 2 + n.credentials.len(),
            _ => 0,
        };
        let total = HEADER_LEN + block_length + var_length;
        if total > MAX_FRAME_LEN {
            return Err(EncodeError::FrameTooLarge {
                size: total,
                max_size: MAX_FRAME_LEN,
            });
        }

        let mut dst = BytesMut::with_capacity(total);
        MessageHeader {
            message_length: total as u16,
            block_length: block_length as u16,
            template_id: template as u16,
            schema_id: SESSION_SCHEMA_ID,
            version: SESSION_SCHEMA_VERSION,
        }
        .encode(&mut dst);

        match self {
            Self::Negotiate(n) => {
                dst.put_slice(n.session_id.as_bytes());
                dst.put_u8(n.flow.code());
                dst.put_u32_le(n.keepalive_ms);
                dst.put_u64_le(n.next_seq);
                dst.put_u16_le(n.credentials.len() as u16);
                dst.put_slice(&n.credentials);
            }
            Self::Establish(e) => {
                dst.put_slice(e.session_id.as_bytes());
                dst.put_u8(e.flow.code());
                dst.put_u32_le(e.keepalive_ms);
                dst.put_u64_le(e.next_seq);
            }
            Self::Terminate(t) => {
                dst.put_slice(t.session_id.as_bytes());
                dst.put_u8(t.code.code());
            }
            Self::UnsequencedHeartbeat => {}
            Self::Sequence { next_seq } => dst.put_u64_le(*next_seq),
            Self::NotApplied { from_seq, count } => {
                dst.put_u64_le(*from_seq);
                dst.put_u32_le(*count);
            }
            Self::Retransmission { next_seq, count } => {
                dst.put_u64_le(*next_seq);
                dst.put_u32_le(*count);
            }
            Self::FinishedSending { last_seq } => dst.put_u64_le(*last_seq),
        }
        Ok(dst.freeze())
    }

    /// Decodes a complete session frame.
    ///
    /// # Errors
    /// Returns `DecodeError` if the frame is not a well-formed session message.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let header = MessageHeader::decode(frame)?;
        if !header.is_session() {
            return Err(DecodeError::NotSessionMessage(header.schema_id));
        }
        let template = TemplateId::try_from(header.template_id)?;
        let needed = template.block_length();
        let mut body = &frame[HEADER_LEN..];
        let block_length = header.block_length as usize;
        if block_length < needed || body.len() < block_length {
            return Err(DecodeError::Truncated {
                template: header.template_id,
                needed: needed.max(block_length),
                available: body.len(),
            });
        }

        let message = match template {
            TemplateId::Negotiate => {
                let session_id = read_session_id(&mut body);
                let flow = FlowType::try_from(body.get_u8())?;
                let keepalive_ms = body.get_u32_le();
                let next_seq = body.get_u64_le();
                // skip any block extension from a newer schema version
                body.advance(block_length - needed);
                if body.len() < 2 {
                    return Err(DecodeError::Truncated {
                        template: header.template_id,
                        needed: 2,
                        available: body.len(),
                    });
                }
                let len = body.get_u16_le() as usize;
                if body.len() < len {
                    return Err(DecodeError::Truncated {
                        template: header.template_id,
                        needed: len,
                        available: body.len(),
                    });
                }
                Self::Negotiate(Negotiate {
                    session_id,
                    flow,
                    keepalive_ms,
                    next_seq,
                    credentials: Bytes::copy_from_slice(&body[..len]),
                })
            }
            TemplateId::Establish => Self::Establish(Establish {
                session_id: read_session_id(&mut body),
                flow: FlowType::try_from(body.get_u8())?,
                keepalive_ms: body.get_u32_le(),
                next_seq: body.get_u64_le(),
            }),
            TemplateId::Terminate => Self::Terminate(Terminate {
                session_id: read_session_id(&mut body),
                code: TerminationCode::from(body.get_u8()),
            }),
            TemplateId::UnsequencedHeartbeat => Self::UnsequencedHeartbeat,
            TemplateId::Sequence => Self::Sequence {
                next_seq: body.get_u64_le(),
            },
            TemplateId::NotApplied => Self::NotApplied {
                from_seq: body.get_u64_le(),
                count: body.get_u32_le(),
            },
            TemplateId::Retransmission => Self::Retransmission {
                next_seq: body.get_u64_le(),
                count: body.get_u32_le(),
            },
            TemplateId::FinishedSending => Self::FinishedSending {
                last_seq: body.get_u64_le(),
            },
        };
        Ok(message)
    }
}

fn read_session_id(body: &mut &[u8]) -> SessionId {
    let mut bytes = [0u8; SESSION_ID_LEN];
    body.copy_to_slice(&mut bytes);
    SessionId::from_bytes(bytes)
}

/// Encodes an application frame with a header in front of `body`.
///
/// # Errors
/// Returns `EncodeError` if the frame is too large or uses the session schema.
pub fn encode_application_frame(
    template_id: u16,
    schema_id: u16,
    version: u16,
    body: &[u8],
) -> Result<Bytes, EncodeError> {
    if schema_id == SESSION_SCHEMA_ID {
        return Err(EncodeError::MalformedFrame(
            "application frames cannot use the session schema".to_string(),
        ));
    }
    let total = HEADER_LEN + body.len();
    if total > MAX_FRAME_LEN {
        return Err(EncodeError::FrameTooLarge {
            size: total,
            max_size: MAX_FRAME_LEN,
        });
    }
    let mut dst = BytesMut::with_capacity(total);
    MessageHeader {
        message_length: total as u16,
        block_length: body.len() as u16,
        template_id,
        schema_id,
        version,
    }
    .encode(&mut dst);
    dst.put_slice(body);
    Ok(dst.freeze())
}

/// Checks that an outbound application frame carries a consistent header.
///
/// # Errors
/// Returns `EncodeError::MalformedFrame` if the header is missing, its length
/// disagrees with the frame, or it claims the session schema.
pub fn validate_application_frame(frame: &[u8]) -> Result<MessageHeader, EncodeError> {
    let header =
        MessageHeader::decode(frame).map_err(|e| EncodeError::MalformedFrame(e.to_string()))?;
    if header.is_session() {
        return Err(EncodeError::MalformedFrame(
            "application frames cannot use the session schema".to_string(),
        ));
    }
    Ok(header)
}
