//! In-memory link pair for testing
//!
//! Two cross-wired [`MockLink`] halves: bytes written to one half are read
//! from the other. Reads never block; an empty buffer reports a timeout while
//! the peer is alive and EOF once it is gone, which mirrors how the framed
//! channel maps socket errors.

use crate::error::Result;
use crate::transport::{Link, ShutdownHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One half of an in-memory duplex link
pub struct MockLink {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<VecDeque<u8>>>,
    alive: Arc<AtomicBool>,
    peer_alive: Arc<AtomicBool>,
}

impl MockLink {
    /// Create a cross-wired pair
    pub fn pair() -> (MockLink, MockLink) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        let a_alive = Arc::new(AtomicBool::new(true));
        let b_alive = Arc::new(AtomicBool::new(true));

        let a = MockLink {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            alive: Arc::clone(&a_alive),
            peer_alive: Arc::clone(&b_alive),
        };
        let b = MockLink {
            rx: a_to_b,
            tx: b_to_a,
            alive: b_alive,
            peer_alive: a_alive,
        };
        (a, b)
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.alive.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut queue = self.rx.lock();
        let n = queue.len().min(buf.len());
        if n == 0 {
            return if self.peer_alive.load(Ordering::SeqCst) {
                Err(std::io::Error::new(ErrorKind::TimedOut, "no data buffered"))
            } else {
                Ok(0)
            };
        }
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.alive.load(Ordering::SeqCst) || !self.peer_alive.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "peer gone"));
        }
        self.tx.lock().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Link for MockLink {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn shutdown_handle(&self) -> Result<Box<dyn ShutdownHandle>> {
        Ok(Box::new(MockShutdown {
            alive: Arc::clone(&self.alive),
        }))
    }

    fn peer_label(&self) -> String {
        "mock".to_string()
    }
}

struct MockShutdown {
    alive: Arc<AtomicBool>,
}

impl ShutdownHandle for MockShutdown {
    fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
