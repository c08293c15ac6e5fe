//! TCP debug transport

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use log::debug;

use crate::engine::DebugTransport;

const TAG: &str = "debugger";

/// Debug protocol transport over an accepted TCP connection.
///
/// Once the peer closes the connection or an I/O error occurs the transport
/// stays disconnected and every later call fails.
pub struct SocketTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    disconnected: bool,
}

impl SocketTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            peer,
            disconnected: false,
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn ensure_connected(&self) -> io::Result<()> {
        if self.disconnected {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        } else {
            Ok(())
        }
    }

    fn observe<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::WouldBlock {
                debug!(target: TAG, "transport error: {}", e);
                self.disconnected = true;
            }
        }
        result
    }

    fn closed(&mut self) {
        if !self.disconnected {
            debug!(target: TAG, "peer closed the connection");
        }
        self.disconnected = true;
    }

    fn peek_available(&mut self) -> io::Result<usize> {
        let mut scratch = [0u8; 256];
        self.stream.set_nonblocking(true)?;
        let peeked = self.stream.peek(&mut scratch);
        self.stream.set_nonblocking(false)?;
        match peeked {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl DebugTransport for SocketTransport {
    /// Blocks until at least one byte arrives. Returns 0 on EOF.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_connected()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = loop {
            match self.stream.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let n = self.observe(result)?;
        if n == 0 {
            self.closed();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_connected()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = loop {
            match self.stream.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let n = self.observe(result)?;
        if n == 0 {
            self.closed();
        }
        Ok(n)
    }

    /// Bytes readable without blocking, up to a small peek buffer.
    fn peek(&mut self) -> io::Result<usize> {
        self.ensure_connected()?;
        let result = self.peek_available();
        if matches!(&result, Err(e) if e.kind() == io::ErrorKind::UnexpectedEof) {
            self.closed();
            return result;
        }
        self.observe(result)
    }

    fn read_flush(&mut self) {}

    fn write_flush(&mut self) -> io::Result<()> {
        self.ensure_connected()?;
        let result = self.stream.flush();
        self.observe(result)
    }
}
