/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Session configuration.
//!
//! This module provides configuration options for FIXP sessions.

use bytes::Bytes;
use fixp_core::error::SessionError;
use fixp_core::frame::{HEADER_LEN, MAX_FRAME_LEN};
use fixp_core::types::FlowType;
use std::time::Duration;

/// Configuration for a FIXP session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flow of the session's outbound direction.
    pub outbound_flow: FlowType,
    /// Outbound keepalive interval. Zero disables outbound heartbeats.
    pub keepalive_interval: Duration,
    /// Credentials presented in Negotiate.
    pub credentials: Bytes,
    /// Peer silence tolerated, as a multiple of the peer's keepalive interval.
    pub peer_timeout_factor: u32,
    /// Flows a server accepts from its clients.
    pub accepted_flows: Vec<FlowType>,
    /// Out-of-order frames a recoverable receiver holds while a gap is open.
    pub max_buffered_frames: usize,
    /// Largest application frame accepted for sending.
    pub max_frame_size: usize,
    /// Capacity of the buffered ingestion stage; `None` delivers transport
    /// callbacks straight to the reactor.
    pub ingest_queue_capacity: Option<usize>,
}

impl SessionConfig {
    /// Creates a configuration for the given outbound flow.
    #[must_use]
    pub fn new(outbound_flow: FlowType) -> Self {
        Self {
            outbound_flow,
            keepalive_interval: Duration::from_secs(1),
            credentials: Bytes::new(),
            peer_timeout_factor: 2,
            accepted_flows: FlowType::ALL.to_vec(),
            max_buffered_frames: 1024,
            max_frame_size: MAX_FRAME_LEN,
            ingest_queue_capacity: None,
        }
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Sets the outbound keepalive interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: impl Into<Bytes>) -> Self {
        self.credentials = credentials.into();
        self
    }

    /// Returns the keepalive interval in milliseconds as carried on the wire.
    #[must_use]
    pub fn keepalive_ms(&self) -> u32 {
        u32::try_from(self.keepalive_interval.as_millis()).unwrap_or(u32::MAX)
    }

    /// Returns the watchdog interval for a peer announcing `peer_keepalive_ms`,
    /// or `None` if the peer does not send heartbeats.
    #[must_use]
    pub fn watchdog_interval(&self, peer_keepalive_ms: u32) -> Option<Duration> {
        if peer_keepalive_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(u64::from(peer_keepalive_ms)) * self.peer_timeout_factor)
    }

    /// Returns true if a server accepts `flow`.
    #[must_use]
    pub fn accepts(&self, flow: FlowType) -> bool {
        self.accepted_flows.contains(&flow)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.peer_timeout_factor == 0 {
            return Err(SessionError::Configuration(
                "peer timeout factor must be at least 1".to_string(),
            ));
        }
        if self.accepted_flows.is_empty() {
            return Err(SessionError::Configuration(
                "at least one flow must be accepted".to_string(),
            ));
        }
        if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&self.max_frame_size) {
            return Err(SessionError::Configuration(format!(
                "max frame size {} outside {HEADER_LEN}..={MAX_FRAME_LEN}",
                self.max_frame_size
            )));
        }
        if self.credentials.len() > usize::from(u16::MAX) {
            return Err(SessionError::Configuration(
                "credentials exceed 65535 bytes".to_string(),
            ));
        }
        if self.ingest_queue_capacity == Some(0) {
            return Err(SessionError::Configuration(
                "ingest queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(FlowType::default())
    }
}

/// Builder for session configuration.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    outbound_flow: Option<FlowType>,
    keepalive_interval: Option<Duration>,
    credentials: Option<Bytes>,
    peer_timeout_factor: Option<u32>,
    accepted_flows: Option<Vec<FlowType>>,
    max_buffered_frames: Option<usize>,
    max_frame_size: Option<usize>,
    ingest_queue_capacity: Option<usize>,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outbound flow.
    #[must_use]
    pub const fn outbound_flow(mut self, flow: FlowType) -> Self {
        self.outbound_flow = Some(flow);
        self
    }

    /// Sets the outbound keepalive interval.
    #[must_use]
    pub const fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: impl Into<Bytes>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Sets the peer timeout factor.
    #[must_use]
    pub const fn peer_timeout_factor(mut self, factor: u32) -> Self {
        self.peer_timeout_factor = Some(factor);
        self
    }

    /// Sets the flows a server accepts.
    #[must_use]
    pub fn accepted_flows(mut self, flows: impl IntoIterator<Item = FlowType>) -> Self {
        self.accepted_flows = Some(flows.into_iter().collect());
        self
    }

    /// Sets the recoverable gap buffer bound.
    #[must_use]
    pub const fn max_buffered_frames(mut self, frames: usize) -> Self {
        self.max_buffered_frames = Some(frames);
        self
    }

    /// Sets the largest application frame accepted for sending.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Enables the buffered ingestion stage with the given capacity.
    #[must_use]
    pub const fn ingest_queue_capacity(mut self, capacity: usize) -> Self {
        self.ingest_queue_capacity = Some(capacity);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if the result is inconsistent.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let mut config = SessionConfig::new(self.outbound_flow.unwrap_or_default());

        if let Some(interval) = self.keepalive_interval {
            config.keepalive_interval = interval;
        }
        if let Some(credentials) = self.credentials {
            config.credentials = credentials;
        }
        if let Some(factor) = self.peer_timeout_factor {
            config.peer_timeout_factor = factor;
        }
        if let Some(flows) = self.accepted_flows {
            config.accepted_flows = flows;
        }
        if let Some(frames) = self.max_buffered_frames {
            config.max_buffered_frames = frames;
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        config.ingest_queue_capacity = self.ingest_queue_capacity;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.outbound_flow, FlowType::Idempotent);
        assert_eq!(config.peer_timeout_factor, 2);
        assert_eq!(config.accepted_flows.len(), 4);
        assert_eq!(config.max_buffered_frames, 1024);
        assert!(config.ingest_queue_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfigBuilder::new()
            .outbound_flow(FlowType::Recoverable)
            .keepalive_interval(Duration::from_millis(500))
            .credentials(&b"User1"[..])
            .accepted_flows([FlowType::Recoverable])
            .build()
            .unwrap();

        assert_eq!(config.keepalive_ms(), 500);
        assert_eq!(&config.credentials[..], b"User1");
        assert!(config.accepts(FlowType::Recoverable));
        assert!(!config.accepts(FlowType::None));
    }

    #[test]
    fn test_watchdog_interval() {
        let config = SessionConfig::default();
        assert_eq!(config.watchdog_interval(0), None);
        assert_eq!(
            config.watchdog_interval(500),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_builder_rejects_inconsistent_config() {
        assert!(
            SessionConfigBuilder::new()
                .accepted_flows([])
                .build()
                .is_err()
        );
        assert!(
            SessionConfigBuilder::new()
                .max_frame_size(4)
                .build()
                .is_err()
        );
        assert!(
            SessionConfigBuilder::new()
                .ingest_queue_capacity(0)
                .build()
                .is_err()
        );
    }
}
