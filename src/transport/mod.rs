//! Transport layer: pluggable byte links and the framed channel
//!
//! A [`Link`] is a reliable, ordered byte stream. The plain implementation is
//! [`TcpLink`]; an encrypting wrapper (TLS or similar) implements the same
//! trait after its handshake, and callers of the framed channel cannot tell
//! the difference.

use crate::error::Result;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

mod framed;
pub use framed::{ChannelStats, FramedChannel};

mod mock;
pub use mock::MockLink;

/// Reliable byte stream the framed channel runs over
pub trait Link: Read + Write + Send {
    /// Bound the time a single read may block
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Handle that can terminate this link from another thread, unblocking
    /// any read parked on it
    fn shutdown_handle(&self) -> Result<Box<dyn ShutdownHandle>>;

    /// Human-readable peer identity for logging
    fn peer_label(&self) -> String {
        "unknown".to_string()
    }
}

/// Cross-thread termination handle for a [`Link`]
pub trait ShutdownHandle: Send + Sync {
    /// Terminate the link. Safe to call more than once.
    fn shutdown(&self);
}

/// Plain TCP link with `TCP_NODELAY` set for low-latency control traffic
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpLink { stream })
    }

    /// Connect to a server with a bounded connect timeout
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::new(stream)
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl Link for TcpLink {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    fn shutdown_handle(&self) -> Result<Box<dyn ShutdownHandle>> {
        let clone = self.stream.try_clone()?;
        Ok(Box::new(TcpShutdown { stream: clone }))
    }

    fn peer_label(&self) -> String {
        match self.stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "unknown".to_string(),
        }
    }
}

struct TcpShutdown {
    stream: TcpStream,
}

impl ShutdownHandle for TcpShutdown {
    fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
