/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # FIXP Reactor
//!
//! Event dispatch for the FIXP session engine.
//!
//! This crate provides:
//! - **Topics**: Process-local `(SessionId, EventKind)` addressing
//! - **Reactor**: Single dispatch thread with ordered delivery and fault isolation
//! - **Timers**: Recurring and one-shot posts with cancellable schedules
//! - **Platform**: Optional CPU core pinning of the dispatch thread

pub mod platform;
pub mod reactor;
pub mod topic;

pub use platform::{AffinityPinning, CorePinning, NoPinning, available_cores};
pub use reactor::{
    EventReactor, ExceptionConsumer, HandlerFault, HandlerResult, ReactorBuilder, Subscription,
    TimerSchedule,
};
pub use topic::{Event, EventKind, Payload, Topic};
