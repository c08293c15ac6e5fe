//! Debugger attach handshake
//!
//! ```text
//! Closed --bind--> Listening --accept--> Connected --attach--> Attached
//!    ^                 |                                          |
//!    +---- failure ----+--------------- engine detached ----------+
//! ```
//!
//! The accept runs on a worker thread; the script thread blocks on the
//! channel until the worker hands over the connection. There is no timeout.

use std::io;
use std::net::SocketAddr;
use std::thread;

use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use thiserror::Error;

use super::transport::SocketTransport;
use crate::engine::Context;
use crate::net;

const TAG: &str = "debugger";

/// Listen address used when none is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9091";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Listening,
    Connected,
    Attached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A debugger connected from this address and is now attached.
    Attached(SocketAddr),
    /// A debugger was already attached; nothing changed.
    AlreadyAttached,
}

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("invalid debugger address '{addr}': {source}")]
    Address {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen for a debugger on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to start the accept worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to accept a debugger connection: {0}")]
    Accept(#[source] io::Error),

    #[error("accept worker exited without a connection")]
    WorkerGone,

    #[error("failed to configure the debugger connection: {0}")]
    Transport(#[source] io::Error),
}

/// Per-context debugger session, kept in the context's host data.
#[derive(Debug)]
pub struct DebugSession {
    bind_addr: String,
    state: SessionState,
    peer: Option<SocketAddr>,
    on_listen: Option<Sender<SocketAddr>>,
}

impl DebugSession {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            state: SessionState::Closed,
            peer: None,
            on_listen: None,
        }
    }

    /// Report the bound address on `notify` each time the session starts
    /// listening. Used to connect to an ephemeral port.
    pub fn with_listen_notifier(mut self, notify: Sender<SocketAddr>) -> Self {
        self.on_listen = Some(notify);
        self
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Fold an engine-side detach back into the session state.
    pub fn refresh(&mut self, ctx: &Context) -> SessionState {
        if self.state == SessionState::Attached && !ctx.is_debugger_attached() {
            info!(target: TAG, "debugger detached");
            self.state = SessionState::Closed;
            self.peer = None;
        }
        self.state
    }

    /// Listen, wait for one debugger connection and attach it to `ctx`.
    ///
    /// Blocks the calling thread until a client connects.
    pub fn attach(&mut self, ctx: &mut Context) -> Result<AttachOutcome, DebugError> {
        if self.refresh(ctx) == SessionState::Attached || ctx.is_debugger_attached() {
            warn!(target: TAG, "debugger already attached, ignoring request");
            return Ok(AttachOutcome::AlreadyAttached);
        }
        let result = self.handshake(ctx);
        if let Err(e) = &result {
            error!(target: TAG, "{}", e);
            self.state = SessionState::Closed;
            self.peer = None;
        }
        result
    }

    fn handshake(&mut self, ctx: &mut Context) -> Result<AttachOutcome, DebugError> {
        let addr = net::resolve(&self.bind_addr).map_err(|source| DebugError::Address {
            addr: self.bind_addr.clone(),
            source,
        })?;
        let listener =
            net::bind_listener(addr).map_err(|source| DebugError::Bind { addr, source })?;
        let local = listener.local_addr().unwrap_or(addr);
        self.state = SessionState::Listening;
        info!(target: TAG, "waiting for debugger on {}", local);
        if let Some(notify) = &self.on_listen {
            let _ = notify.send(local);
        }

        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("debug-accept".to_string())
            .spawn(move || {
                // The listener closes when this worker returns
                let _ = tx.send(listener.accept());
            })
            .map_err(DebugError::Spawn)?;

        let (stream, peer) = rx
            .recv()
            .map_err(|_| DebugError::WorkerGone)?
            .map_err(DebugError::Accept)?;
        self.state = SessionState::Connected;
        info!(target: TAG, "debugger connected from {}", peer);

        let transport = SocketTransport::new(stream).map_err(DebugError::Transport)?;
        ctx.debugger_attach(Box::new(transport));
        self.state = SessionState::Attached;
        self.peer = Some(peer);
        Ok(AttachOutcome::Attached(peer))
    }
}

impl Default for DebugSession {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_HEAP_SIZE;
    use std::net::TcpStream;

    fn ctx() -> Context {
        Context::new(DEFAULT_HEAP_SIZE).unwrap()
    }

    #[test]
    fn test_default_address() {
        let session = DebugSession::default();
        assert_eq!(session.bind_addr(), "0.0.0.0:9091");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_attach_and_reentry() {
        let (tx, rx) = bounded(1);
        let client = thread::spawn(move || {
            let addr: SocketAddr = rx.recv().unwrap();
            TcpStream::connect(addr).unwrap()
        });

        let mut ctx = ctx();
        let mut session = DebugSession::new("127.0.0.1:0").with_listen_notifier(tx);
        let outcome = session.attach(&mut ctx).unwrap();
        let _client = client.join().unwrap();

        assert!(matches!(outcome, AttachOutcome::Attached(_)));
        assert_eq!(session.state(), SessionState::Attached);
        assert!(ctx.is_debugger_attached());

        // Does not listen again
        assert_eq!(session.attach(&mut ctx).unwrap(), AttachOutcome::AlreadyAttached);
        assert_eq!(session.state(), SessionState::Attached);
    }

    #[test]
    fn test_detach_returns_to_closed() {
        let (tx, rx) = bounded(1);
        let client = thread::spawn(move || {
            let addr: SocketAddr = rx.recv().unwrap();
            TcpStream::connect(addr).unwrap()
        });
        let mut ctx = ctx();
        let mut session = DebugSession::new("127.0.0.1:0").with_listen_notifier(tx);
        session.attach(&mut ctx).unwrap();
        drop(client.join().unwrap());

        let mut buf = [0u8; 8];
        assert_eq!(ctx.debugger_read(&mut buf), 0);
        assert!(!ctx.is_debugger_attached());
        assert_eq!(session.refresh(&ctx), SessionState::Closed);
        assert_eq!(session.peer(), None);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = net::bind_listener(net::resolve("127.0.0.1:0").unwrap()).unwrap();
        let addr = taken.local_addr().unwrap();
        let mut session = DebugSession::new(addr.to_string());
        let mut ctx = ctx();
        let err = session.attach(&mut ctx).unwrap_err();
        assert!(matches!(err, DebugError::Bind { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!ctx.is_debugger_attached());
    }

    #[test]
    fn test_bad_address() {
        let mut session = DebugSession::new("definitely not an address");
        let err = session.attach(&mut ctx()).unwrap_err();
        assert!(matches!(err, DebugError::Address { .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
