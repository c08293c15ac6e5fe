//! Remote debugger support
//!
//! `ESP32.debug()` runs [`DebugSession::attach`], which waits for a single
//! TCP client and binds the engine's debug protocol to it through a
//! [`SocketTransport`].

pub mod session;
pub mod transport;

pub use session::{AttachOutcome, DebugError, DebugSession, SessionState, DEFAULT_BIND_ADDR};
pub use transport::SocketTransport;
