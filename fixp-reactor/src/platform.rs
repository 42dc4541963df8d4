/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! CPU core pinning for dispatch threads.
//!
//! Pinning keeps a reactor's dispatch thread on one core. Platforms without
//! affinity support use [`NoPinning`].

use core_affinity::CoreId;
use std::fmt;

/// Capability to pin the calling thread to a CPU core.
pub trait CorePinning: Send + Sync + fmt::Debug {
    /// Pins the current thread to `core_id`.
    ///
    /// Returns `true` if the thread is now pinned.
    fn pin(&self, core_id: usize) -> bool;
}

/// Pins threads with the operating system's affinity API.
#[derive(Debug, Default, Clone, Copy)]
pub struct AffinityPinning;

impl CorePinning for AffinityPinning {
    fn pin(&self, core_id: usize) -> bool {
        let pinned = core_affinity::set_for_current(CoreId { id: core_id });
        if pinned {
            tracing::info!(core_id, "pinned dispatch thread");
        }
        pinned
    }
}

/// Leaves threads unpinned.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPinning;

impl CorePinning for NoPinning {
    fn pin(&self, _core_id: usize) -> bool {
        false
    }
}

/// Returns the number of cores threads can be pinned to.
#[must_use]
pub fn available_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_cores() {
        assert!(available_cores() > 0);
    }

    #[test]
    fn test_no_pinning_never_pins() {
        assert!(!NoPinning.pin(0));
    }

    #[test]
    fn test_affinity_pinning_on_spawned_thread() {
        // support varies by platform, so only check that it does not panic
        let handle = std::thread::spawn(|| AffinityPinning.pin(0));
        assert!(handle.join().is_ok());
    }
}
