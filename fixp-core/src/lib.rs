/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP Core
//!
//! Core types, wire messages, and error definitions for the FIXP session engine.
//!
//! This crate provides the fundamental building blocks used across all FIXP crates:
//! - **Error types**: Unified error handling with `thiserror`
//! - **Identity**: `SessionId` and `FlowType`
//! - **Faults**: `SessionFault`, `FaultKind`, and `TerminationCode`
//! - **Frames**: `MessageHeader` and the session control `SessionMessage` set
//!
//! ## Frame Design
//!
//! Session control messages share the frame header with application messages
//! and are told apart by their schema identifier, so application frames travel
//! through the session layer without being copied or re-encoded.

pub mod error;
pub mod frame;
pub mod types;

pub use error::{
    DecodeError, EncodeError, FixpError, ReactorError, Result, SessionError, TransportError,
};
pub use frame::{
    Establish, HEADER_LEN, MessageHeader, Negotiate, SESSION_SCHEMA_ID, SessionMessage,
    TemplateId, Terminate, encode_application_frame, validate_application_frame,
};
pub use types::{
    Direction, FaultKind, FlowType, NotAppliedRange, SessionFault, SessionId, TerminationCode,
};
