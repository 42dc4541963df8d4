/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Engine facade.
//!
//! An [`Engine`] owns one reactor and every session created through it. A
//! client and a server that share a session id must live on different
//! engines.

use crate::builder::EngineBuilder;
use fixp_core::error::{Result, SessionError};
use fixp_reactor::EventReactor;
use fixp_session::{Authenticator, FixpSession, MessageConsumer, SessionConfig, SessionState};
use fixp_transport::{BufferSupplier, Transport};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// FIXP engine owning a reactor and its sessions.
pub struct Engine {
    reactor: EventReactor,
    authenticator: Option<Arc<dyn Authenticator>>,
    session_config: SessionConfig,
    buffers: Arc<dyn BufferSupplier>,
    sessions: Mutex<Vec<FixpSession>>,
}

impl Engine {
    pub(crate) fn new(
        reactor: EventReactor,
        authenticator: Option<Arc<dyn Authenticator>>,
        session_config: SessionConfig,
        buffers: Arc<dyn BufferSupplier>,
    ) -> Self {
        Self {
            reactor,
            authenticator,
            session_config,
            buffers,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Starts the reactor.
    ///
    /// # Errors
    /// Returns `ReactorError` if the reactor was closed or its thread could
    /// not be spawned.
    pub fn open(&self) -> Result<()> {
        self.reactor.open()?;
        info!(reactor = self.reactor.name(), "engine opened");
        Ok(())
    }

    /// Closes every session, then the reactor.
    pub fn close(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in &sessions {
            if let Err(err) = session.close() {
                debug!(session = ?session, error = %err, "session close failed");
            }
        }
        self.reactor.close();
        info!(reactor = self.reactor.name(), sessions = sessions.len(), "engine closed");
    }

    /// Returns the reactor all sessions of this engine run on.
    #[must_use]
    pub fn reactor(&self) -> &EventReactor {
        &self.reactor
    }

    /// Returns the sessions that have not terminated.
    ///
    /// Terminated sessions are released here and on every registration.
    #[must_use]
    pub fn sessions(&self) -> Vec<FixpSession> {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions);
        sessions.clone()
    }

    /// Creates and opens a server session over `transport`.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if the engine has no
    /// authenticator, or any error from [`FixpSession::open`].
    pub fn accept<C>(&self, transport: Arc<dyn Transport>, consumer: C) -> Result<FixpSession>
    where
        C: MessageConsumer + 'static,
    {
        let Some(authenticator) = &self.authenticator else {
            return Err(SessionError::Configuration(
                "engine has no authenticator for accepted sessions".to_string(),
            )
            .into());
        };
        let session = FixpSession::builder()
            .with_reactor(self.reactor.clone())
            .with_transport(transport)
            .with_buffer_supplier(Arc::clone(&self.buffers))
            .with_message_consumer(consumer)
            .with_config(self.session_config.clone())
            .as_server(Arc::clone(authenticator))
            .build()?;
        self.register(session)
    }

    /// Creates and opens a client session over `transport`.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` for an inconsistent `config`, or
    /// any error from [`FixpSession::open`].
    pub fn initiate<C>(
        &self,
        transport: Arc<dyn Transport>,
        consumer: C,
        config: SessionConfig,
    ) -> Result<FixpSession>
    where
        C: MessageConsumer + 'static,
    {
        let session = FixpSession::builder()
            .with_reactor(self.reactor.clone())
            .with_transport(transport)
            .with_buffer_supplier(Arc::clone(&self.buffers))
            .with_message_consumer(consumer)
            .with_config(config)
            .build()?;
        self.register(session)
    }

    fn register(&self, session: FixpSession) -> Result<FixpSession> {
        session.open()?;
        debug!(session = ?session, "session registered");
        let mut sessions = self.sessions.lock();
        prune(&mut sessions);
        sessions.push(session.clone());
        Ok(session)
    }
}

fn prune(sessions: &mut Vec<FixpSession>) {
    let before = sessions.len();
    sessions.retain(|session| session.state() != SessionState::Terminated);
    if sessions.len() < before {
        debug!(released = before - sessions.len(), "terminated sessions released");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("reactor", &self.reactor.name())
            .field("acceptor", &self.authenticator.is_some())
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}
