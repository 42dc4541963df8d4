/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Client and server sessions over an in-memory transport.
//!
//! Runs a venue engine and a member engine on separate reactors, negotiates a
//! Recoverable session, streams application frames, and closes gracefully.
//!
//! `FIXP_MESSAGES` sets the number of frames sent (default 127).

use fixp::prelude::*;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let messages: usize = env::var("FIXP_MESSAGES")
        .ok()
        .and_then(|n| n.parse().ok())
        .unwrap_or(127);

    let directory = Arc::new(SimpleDirectory::new());
    directory.add(&b"User1"[..]);
    let venue = Engine::builder()
        .with_reactor_name("venue")
        .with_directory(directory)
        .build()?;
    let member = Engine::builder().with_reactor_name("member").build()?;
    venue.open()?;
    member.open()?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let (member_end, venue_end) = MemoryTransport::pair();

    let acceptor = venue.accept(
        Arc::new(venue_end),
        move |frame: &[u8], session: &FixpSession, seq: u64| {
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id = ?session.session_id(), seq, len = frame.len(), "received");
        },
    )?;
    let session = member.initiate(
        Arc::new(member_end),
        NoOpConsumer,
        SessionConfig::new(FlowType::Recoverable)
            .with_credentials(&b"User1"[..])
            .with_keepalive_interval(Duration::from_millis(250)),
    )?;

    let id = session.ready()?.wait(WAIT)?;
    info!(session_id = %id, "member established");

    let venue_done = acceptor.terminated()?;
    for len in 0..messages {
        let body = vec![b'x'; len];
        session.send(&encode_application_frame(1, 100, 1, &body)?)?;
    }
    session.close()?;
    venue_done.wait(WAIT)?;

    info!(
        sent = messages,
        received = received.load(Ordering::Relaxed),
        sequence = ?session.sequence_state(),
        "session finished"
    );
    member.close();
    venue.close();
    Ok(())
}
