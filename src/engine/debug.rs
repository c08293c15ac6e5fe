//! Debugger transport slots
//!
//! The debug wire protocol is owned by the engine. A host only supplies a
//! byte transport through these five callbacks.

use std::io;

/// Byte transport a remote debugger talks through.
pub trait DebugTransport {
    /// Read up to `buf.len()` bytes, blocking until at least one is available.
    /// `Ok(0)` for a non-empty buffer means the peer went away.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Number of bytes that can be read without blocking.
    fn peek(&mut self) -> io::Result<usize>;

    /// Hint that the engine finished reading a message.
    fn read_flush(&mut self);

    /// Hint that the engine finished writing a message.
    fn write_flush(&mut self) -> io::Result<()>;
}
