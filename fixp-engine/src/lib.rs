/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP Engine
//!
//! High-level facade over the FIXP session layer.
//!
//! This crate provides:
//! - **Engine**: Owns one reactor and creates sessions bound to it
//! - **Acceptor**: Server sessions that authenticate incoming Negotiate requests
//! - **Initiator**: Client sessions that negotiate over a supplied transport
//! - **Builder API**: Fluent configuration for engine setup

pub mod builder;
pub mod engine;

pub use builder::EngineBuilder;
pub use engine::Engine;
