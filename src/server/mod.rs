//! Bridge server: accept loop, session threads, priority dispatch, and the
//! liveness sweeper
//!
//! One thread per connected client (blocking reads), one shared serial write
//! dispatcher, one heartbeat sweeper, one camera capture thread. Sessions are
//! owned by the [`SessionRegistry`]; the sweeper evicts any session that
//! stops sending traffic, independently of the client's own heartbeat.

use crate::device::SerialDevice;
use crate::error::{Error, Result};
use crate::protocol::MAX_COMMAND_FRAME;
use crate::queue::{CommandQueue, WriteDispatcher, QUEUE_CAPACITY};
use crate::transport::{FramedChannel, Link, TcpLink};
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub mod frames;
pub mod registry;
mod session;

pub use frames::{FrameBuffer, FrameSource, NullFrameSource};
pub use registry::SessionRegistry;

use frames::capture_loop;
use session::Session;

/// Per-read timeout inside session loops, so shutdown is observed promptly
const SESSION_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between accept attempts when the listener has nothing to hand out
/// or keeps failing (EMFILE and friends must not spin the loop hot)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Tuning knobs for the liveness sweeper
#[derive(Debug, Clone, Copy)]
pub struct ServerTuning {
    /// How often the sweeper checks for silent sessions
    pub sweep_interval: Duration,
    /// Maximum silence before a session is presumed dead
    pub session_timeout: Duration,
}

impl Default for ServerTuning {
    fn default() -> Self {
        ServerTuning {
            sweep_interval: Duration::from_secs(5),
            session_timeout: Duration::from_secs(15),
        }
    }
}

/// The bridge server
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    queue: Arc<CommandQueue>,
    running: Arc<AtomicBool>,
    dispatcher: Option<WriteDispatcher>,
    threads: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl Server {
    /// Bind and start all server threads with default tuning
    pub fn start(
        bind_addr: &str,
        device: Box<dyn SerialDevice>,
        source: Box<dyn FrameSource>,
    ) -> Result<Server> {
        Self::start_with(bind_addr, device, source, ServerTuning::default())
    }

    /// Bind and start all server threads
    pub fn start_with(
        bind_addr: &str,
        device: Box<dyn SerialDevice>,
        source: Box<dyn FrameSource>,
        tuning: ServerTuning,
    ) -> Result<Server> {
        let listener = TcpListener::bind(bind_addr)
            .map_err(|e| Error::Other(format!("failed to bind to {}: {}", bind_addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let device: Arc<Mutex<Box<dyn SerialDevice>>> = Arc::new(Mutex::new(device));
        let queue = Arc::new(CommandQueue::new(QUEUE_CAPACITY));
        let frames = Arc::new(FrameBuffer::new());
        let registry = Arc::new(SessionRegistry::new());
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        let dispatcher = WriteDispatcher::start(Arc::clone(&queue), Arc::clone(&device))?;

        // Camera capture thread
        let capture_buffer = Arc::clone(&frames);
        let capture_running = Arc::clone(&running);
        threads.push(
            thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || capture_loop(source, capture_buffer, capture_running))
                .map_err(|e| Error::Other(format!("failed to spawn capture thread: {}", e)))?,
        );

        // Liveness sweeper thread
        let sweep_registry = Arc::clone(&registry);
        let sweep_running = Arc::clone(&running);
        threads.push(
            thread::Builder::new()
                .name("session-sweeper".to_string())
                .spawn(move || {
                    sweeper_loop(sweep_registry, sweep_running, tuning);
                })
                .map_err(|e| Error::Other(format!("failed to spawn sweeper: {}", e)))?,
        );

        // Accept thread
        let accept_registry = Arc::clone(&registry);
        let accept_running = Arc::clone(&running);
        let accept_device = Arc::clone(&device);
        let accept_queue = Arc::clone(&queue);
        let accept_frames = Arc::clone(&frames);
        threads.push(
            thread::Builder::new()
                .name("tcp-accept".to_string())
                .spawn(move || {
                    accept_loop(
                        listener,
                        accept_registry,
                        accept_device,
                        accept_queue,
                        accept_frames,
                        accept_running,
                    );
                })
                .map_err(|e| Error::Other(format!("failed to spawn accept loop: {}", e)))?,
        );

        log::info!("Server listening on {}", local_addr);

        Ok(Server {
            local_addr,
            registry,
            queue,
            running,
            dispatcher: Some(dispatcher),
            threads,
            started_at: Instant::now(),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Pending serial writes in the priority queue
    pub fn queued_writes(&self) -> usize {
        self.queue.len()
    }

    /// Seconds since the server started
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop all threads, close every session, and discard queued writes.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("Server shutting down");

        // Closing session transports unblocks their parked reads
        self.registry.close_all();

        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::info!("Server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    device: Arc<Mutex<Box<dyn SerialDevice>>>,
    queue: Arc<CommandQueue>,
    frames: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) {
    log::debug!("Accept loop started");
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    log::error!("Failed to set blocking mode for {}: {}", addr, e);
                    continue;
                }

                let id = match registry.register(&stream, addr) {
                    Ok(id) => id,
                    Err(e) => {
                        log::error!("Failed to register {}: {}", addr, e);
                        continue;
                    }
                };

                let channel = match open_session_channel(stream) {
                    Ok(channel) => channel,
                    Err(e) => {
                        log::error!("Failed to set up channel for {}: {}", addr, e);
                        registry.remove(id);
                        continue;
                    }
                };

                let session = Session::new(
                    id,
                    channel,
                    Arc::clone(&device),
                    Arc::clone(&queue),
                    Arc::clone(&frames),
                    Arc::clone(&registry),
                    Arc::clone(&running),
                );
                let session_registry = Arc::clone(&registry);
                let spawned = thread::Builder::new()
                    .name(format!("session-{}", id))
                    .spawn(move || {
                        if let Err(e) = session.run() {
                            log::error!("Client-{} session failed: {}", id, e);
                        }
                        session_registry.remove(id);
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn session thread: {}", e);
                    registry.remove(id);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    log::error!("Accept error: {}", e);
                }
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }
    }
    log::debug!("Accept loop stopped");
}

fn open_session_channel(stream: std::net::TcpStream) -> Result<FramedChannel> {
    let mut link = TcpLink::new(stream)?;
    link.set_read_timeout(Some(SESSION_READ_TIMEOUT))?;
    Ok(FramedChannel::new(Box::new(link), MAX_COMMAND_FRAME))
}

fn sweeper_loop(registry: Arc<SessionRegistry>, running: Arc<AtomicBool>, tuning: ServerTuning) {
    log::debug!("Session sweeper started");
    let slice = Duration::from_millis(100).min(tuning.sweep_interval);
    let mut elapsed = Duration::ZERO;
    while running.load(Ordering::Relaxed) {
        thread::sleep(slice);
        elapsed += slice;
        if elapsed < tuning.sweep_interval {
            continue;
        }
        elapsed = Duration::ZERO;
        let evicted = registry.evict_stale(tuning.session_timeout);
        if !evicted.is_empty() {
            log::info!("Evicted {} dead session(s)", evicted.len());
        }
    }
    log::debug!("Session sweeper stopped");
}
