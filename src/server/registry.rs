//! Session registry with last-seen liveness tracking
//!
//! The registry is the single owner of all live sessions. Session threads
//! refresh their last-seen stamp on every decoded command; the sweeper thread
//! evicts sessions that have gone silent. Removal is idempotent, so a session
//! that disconnects while the sweeper is evicting it is only torn down once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct SessionEntry {
    stream: TcpStream,
    addr: SocketAddr,
    last_seen: Instant,
}

/// Registry of connected client sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a newly accepted client; returns its session id.
    ///
    /// The registry keeps a clone of the stream so eviction and shutdown can
    /// unblock the session thread from outside.
    pub fn register(&self, stream: &TcpStream, addr: SocketAddr) -> std::io::Result<u64> {
        let clone = stream.try_clone()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(
            id,
            SessionEntry {
                stream: clone,
                addr,
                last_seen: Instant::now(),
            },
        );
        log::info!("Client-{} connected from {}", id, addr);
        Ok(id)
    }

    /// Refresh the last-seen stamp for a session
    pub fn touch(&self, id: u64) {
        if let Some(entry) = self.sessions.lock().get_mut(&id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Remove a session, closing its transport. Returns false if it was
    /// already gone.
    pub fn remove(&self, id: u64) -> bool {
        match self.sessions.lock().remove(&id) {
            Some(entry) => {
                let _ = entry.stream.shutdown(Shutdown::Both);
                log::info!("Client-{} ({}) removed", id, entry.addr);
                true
            }
            None => false,
        }
    }

    /// Evict every session whose last-seen age exceeds `timeout`.
    /// Returns the evicted session ids.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<u64> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let stale: Vec<u64> = sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > timeout)
            .map(|(&id, _)| id)
            .collect();
        for &id in &stale {
            if let Some(entry) = sessions.remove(&id) {
                let _ = entry.stream.shutdown(Shutdown::Both);
                log::warn!(
                    "Client-{} ({}) timed out after {:?} of silence",
                    id,
                    entry.addr,
                    now.duration_since(entry.last_seen)
                );
            }
        }
        stale
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no client is connected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session transport and empty the registry
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock();
        for (id, entry) in sessions.drain() {
            let _ = entry.stream.shutdown(Shutdown::Both);
            log::debug!("Client-{} closed during shutdown", id);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
