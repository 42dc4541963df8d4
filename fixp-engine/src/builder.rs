/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Engine builder for fluent configuration.
//!
//! This module provides a builder API for configuring FIXP engines.

use crate::engine::Engine;
use fixp_core::error::Result;
use fixp_reactor::{HandlerFault, ReactorBuilder};
use fixp_session::{Authenticator, DirectoryAuthenticator, SessionConfig, SimpleDirectory};
use fixp_transport::{BufferSupplier, HeapBufferSupplier};
use std::fmt;
use std::sync::Arc;

/// Builder for configuring a FIXP engine.
pub struct EngineBuilder {
    /// Reactor settings.
    reactor: ReactorBuilder,
    /// Credential check for accepted sessions.
    authenticator: Option<Arc<dyn Authenticator>>,
    /// Template for sessions created by the engine.
    session_config: SessionConfig,
    /// Buffers handed to transports.
    buffers: Arc<dyn BufferSupplier>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a new engine builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reactor: ReactorBuilder::new().with_name("fixp-engine"),
            authenticator: None,
            session_config: SessionConfig::default(),
            buffers: Arc::new(HeapBufferSupplier::default()),
        }
    }

    /// Sets the authenticator used by acceptor sessions.
    #[must_use]
    pub fn with_authenticator<A>(mut self, authenticator: A) -> Self
    where
        A: Authenticator + 'static,
    {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Authenticates acceptor sessions against an in-memory directory.
    #[must_use]
    pub fn with_directory(self, directory: Arc<SimpleDirectory>) -> Self {
        self.with_authenticator(DirectoryAuthenticator::new(directory))
    }

    /// Sets the configuration template for acceptor sessions.
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the reactor thread name.
    #[must_use]
    pub fn with_reactor_name(mut self, name: impl Into<String>) -> Self {
        self.reactor = self.reactor.with_name(name);
        self
    }

    /// Pins the reactor thread to a CPU core.
    #[must_use]
    pub fn pinned_to_core(mut self, core_id: usize) -> Self {
        self.reactor = self.reactor.pinned_to_core(core_id);
        self
    }

    /// Sets the consumer of reactor handler faults.
    #[must_use]
    pub fn with_exception_consumer<F>(mut self, consumer: F) -> Self
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        self.reactor = self.reactor.with_exception_consumer(consumer);
        self
    }

    /// Sets the buffer supplier handed to transports.
    #[must_use]
    pub fn with_buffer_supplier(mut self, buffers: Arc<dyn BufferSupplier>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Returns the acceptor session configuration.
    #[must_use]
    pub const fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Returns whether acceptor sessions can be created.
    #[must_use]
    pub const fn is_acceptor(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Builds the engine. Its reactor does not run until [`Engine::open`].
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if the session configuration is
    /// inconsistent.
    pub fn build(self) -> Result<Engine> {
        self.session_config.validate()?;
        Ok(Engine::new(
            self.reactor.build(),
            self.authenticator,
            self.session_config,
            self.buffers,
        ))
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("acceptor", &self.is_acceptor())
            .field("session_config", &self.session_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixp_core::types::FlowType;
    use fixp_session::AuthOutcome;
    use std::time::Duration;

    #[test]
    fn test_engine_builder_default() {
        let builder = EngineBuilder::new();
        assert!(!builder.is_acceptor());
        assert_eq!(builder.session_config().outbound_flow, FlowType::default());
        assert_eq!(
            builder.session_config().keepalive_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_engine_builder_with_authenticator() {
        let builder = EngineBuilder::new()
            .with_authenticator(|_: &[u8]| AuthOutcome::Accepted)
            .with_session_config(SessionConfig::new(FlowType::Recoverable))
            .with_reactor_name("venue");

        assert!(builder.is_acceptor());
        assert_eq!(
            builder.session_config().outbound_flow,
            FlowType::Recoverable
        );
        let engine = builder.build().unwrap();
        assert_eq!(engine.reactor().name(), "venue");
    }

    #[test]
    fn test_engine_builder_rejects_bad_config() {
        let config = SessionConfig::builder().peer_timeout_factor(0).build();
        assert!(config.is_err());

        let mut config = SessionConfig::default();
        config.max_frame_size = 4;
        assert!(EngineBuilder::new().with_session_config(config).build().is_err());
    }
}
