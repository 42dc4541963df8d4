/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Sequence number management.
//!
//! Sequence numbers of sequenced flows start at 1. Both counters hold the last
//! number used, so a fresh [`Sequencer`] reports zero for each.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceState {
    /// Last outbound sequence number assigned.
    pub last_outbound_assigned: u64,
    /// Last inbound sequence number accepted.
    pub last_inbound_accepted: u64,
}

/// Assigns outbound and validates inbound sequence numbers.
///
/// Written only from the owning session's reactor thread; the atomics let
/// other threads read a consistent snapshot.
#[derive(Debug, Default)]
pub struct Sequencer {
    last_outbound: AtomicU64,
    last_inbound: AtomicU64,
}

impl Sequencer {
    /// Creates a sequencer with both counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequencer resuming from previous state.
    ///
    /// # Arguments
    /// * `last_outbound` - Last outbound sequence number assigned
    /// * `last_inbound` - Last inbound sequence number accepted
    #[must_use]
    pub fn with_initial(last_outbound: u64, last_inbound: u64) -> Self {
        Self {
            last_outbound: AtomicU64::new(last_outbound),
            last_inbound: AtomicU64::new(last_inbound),
        }
    }

    /// Assigns and returns the next outbound sequence number.
    #[inline]
    pub fn next_outbound(&self) -> u64 {
        self.last_outbound.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the last outbound sequence number assigned.
    #[inline]
    #[must_use]
    pub fn last_outbound(&self) -> u64 {
        self.last_outbound.load(Ordering::Acquire)
    }

    /// Returns the last inbound sequence number accepted.
    #[inline]
    #[must_use]
    pub fn last_inbound(&self) -> u64 {
        self.last_inbound.load(Ordering::Acquire)
    }

    /// Validates an inbound sequence number, advancing only when it is the
    /// next expected one.
    pub fn validate(&self, received: u64) -> SequenceValidation {
        let last = self.last_inbound.load(Ordering::Acquire);
        let expected = last + 1;
        if received == expected {
            self.last_inbound.store(received, Ordering::Release);
            SequenceValidation::InOrder
        } else if received <= last {
            SequenceValidation::Duplicate
        } else {
            SequenceValidation::Gap { expected, received }
        }
    }

    /// Raises the last inbound number to `seq` if it is higher.
    ///
    /// Used by flows that accept any order and only track the maximum.
    pub fn observe_inbound(&self, seq: u64) {
        self.last_inbound.fetch_max(seq, Ordering::AcqRel);
    }

    /// Returns a snapshot of both counters.
    #[must_use]
    pub fn state(&self) -> SequenceState {
        SequenceState {
            last_outbound_assigned: self.last_outbound(),
            last_inbound_accepted: self.last_inbound(),
        }
    }
}

/// Result of inbound sequence validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceValidation {
    /// Next expected number; the sequencer advanced.
    InOrder,
    /// Already accepted.
    Duplicate,
    /// Numbers between `expected` and `received` are missing.
    Gap {
        /// Next expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },
}

impl SequenceValidation {
    /// Returns true for an in-order number.
    #[must_use]
    pub const fn is_in_order(&self) -> bool {
        matches!(self, Self::InOrder)
    }

    /// Returns true if a gap was detected.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}
