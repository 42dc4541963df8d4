/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Heartbeat-due flag shared by senders and receivers.
//!
//! The flag is armed when a heartbeat timer fires and cleared by traffic in
//! the direction it watches. A sender writes a keepalive only while the flag
//! is armed; a receiver declares its peer silent when a timer finds it still
//! armed from the previous firing.

use std::time::{Duration, Instant};

/// Per-direction liveness flag.
#[derive(Debug, Clone)]
pub struct HeartbeatDue {
    due: bool,
    last_traffic: Instant,
}

impl HeartbeatDue {
    /// Creates an armed flag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            due: true,
            last_traffic: Instant::now(),
        }
    }

    /// Arms the flag. Called when the heartbeat timer fires.
    #[inline]
    pub fn arm(&mut self) {
        self.due = true;
    }

    /// Clears the flag. Called on traffic.
    #[inline]
    pub fn clear(&mut self) {
        self.due = false;
        self.last_traffic = Instant::now();
    }

    /// Returns true if no traffic happened since the flag was armed.
    #[inline]
    #[must_use]
    pub const fn is_due(&self) -> bool {
        self.due
    }

    /// Returns the time since the last traffic.
    #[must_use]
    pub fn since_traffic(&self) -> Duration {
        self.last_traffic.elapsed()
    }
}

impl Default for HeartbeatDue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flag_is_due() {
        assert!(HeartbeatDue::new().is_due());
    }

    #[test]
    fn test_traffic_clears_and_timer_arms() {
        let mut flag = HeartbeatDue::new();
        flag.clear();
        assert!(!flag.is_due());
        assert!(flag.since_traffic() < Duration::from_secs(1));
        flag.arm();
        assert!(flag.is_due());
    }
}
