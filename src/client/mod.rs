//! Bridge client: connection state machine, forwarding loops, heartbeat,
//! and auto-reconnect
//!
//! While connected, three loops drive traffic over one shared channel: the
//! device loop forwards local serial bytes both ways, the frame loop pulls
//! remote camera frames, and the heartbeat loop measures round-trip latency
//! and detects dead connections. The protocol is strictly half-duplex
//! request/response, so every loop serializes its cycle through one
//! exclusive lock on the channel; replies correlate to requests purely by
//! arrival order.
//!
//! Each successful connect produces a *generation* that exclusively owns the
//! socket and the local device handle. On connection loss the generation is
//! halted, all its loops stand down, and only then may the reconnection
//! manager dial a new one, so two generations can never write to the same
//! device concurrently.

use crate::device::{DeviceFactory, SerialDevice};
use crate::error::{Error, Result};
use crate::protocol::{Command, MAX_RESPONSE_FRAME, RESP_OK, RESP_PONG};
use crate::transport::{ChannelStats, FramedChannel, Link, ShutdownHandle, TcpLink};
use parking_lot::Mutex;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod metrics;
mod reconnect;
mod state;

pub use metrics::{ClientStats, LatencySnapshot, LatencyWindow, LATENCY_WINDOW};
use metrics::ConnectedSince;
pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;

/// Heartbeat probe interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Local device poll interval (caps serial forwarding staleness)
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Remote frame poll interval (~30 FPS)
pub const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Bound on the TCP connect attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for a response frame
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Granularity at which sleeps observe cancellation flags
const CANCEL_SLICE: Duration = Duration::from_millis(100);

/// Consumer of remote camera frames (the rendering collaborator)
pub trait FrameSink: Send {
    /// Present one compressed frame
    fn present(&mut self, frame: &[u8]);
}

/// Frame sink that drops frames, for headless deployments and tests
pub struct DiscardFrameSink;

impl FrameSink for DiscardFrameSink {
    fn present(&mut self, frame: &[u8]) {
        log::trace!("Discarding frame of {} bytes", frame.len());
    }
}

/// Client configuration knobs
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server address as `host:port`
    pub server_addr: String,
    /// Reconnect automatically after connection loss
    pub auto_reconnect: bool,
    /// Backoff base delay
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            server_addr: format!("127.0.0.1:{}", crate::protocol::DEFAULT_PORT),
            auto_reconnect: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

/// One connection generation: exclusive owner of the socket and the local
/// device handle for its lifetime
struct Generation {
    channel: Mutex<FramedChannel>,
    shutdown: Box<dyn ShutdownHandle>,
    device: Mutex<Box<dyn SerialDevice>>,
    running: AtomicBool,
    active_loops: AtomicUsize,
}

impl Generation {
    /// One full request/response cycle under the channel lock
    fn request(&self, command: &Command) -> Result<Vec<u8>> {
        let mut channel = self.channel.lock();
        channel.send(&command.encode())?;
        channel.receive()
    }
}

struct ClientShared {
    options: ClientOptions,
    device_factory: DeviceFactory,
    frame_sink: Mutex<Box<dyn FrameSink>>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    generation: Mutex<Option<Arc<Generation>>>,
    policy: Mutex<ReconnectPolicy>,
    latency: Mutex<LatencyWindow>,
    stats: Mutex<ClientStats>,
    connected_since: Mutex<Option<ConnectedSince>>,
    should_reconnect: AtomicBool,
    reconnecting: AtomicBool,
}

/// The bridge client
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Create a client. The device factory is invoked once per connection
    /// generation so each reconnect opens a fresh device handle.
    pub fn new(
        options: ClientOptions,
        device_factory: DeviceFactory,
        frame_sink: Box<dyn FrameSink>,
    ) -> Self {
        let policy = ReconnectPolicy::new(options.base_delay, options.max_delay, options.jitter);
        Client {
            shared: Arc::new(ClientShared {
                options,
                device_factory,
                frame_sink: Mutex::new(frame_sink),
                state: Mutex::new(ConnectionState::Disconnected),
                last_error: Mutex::new(None),
                generation: Mutex::new(None),
                policy: Mutex::new(policy),
                latency: Mutex::new(LatencyWindow::new()),
                stats: Mutex::new(ClientStats::default()),
                connected_since: Mutex::new(None),
                should_reconnect: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to the server and start the forwarding loops.
    ///
    /// A failed attempt (timeout, refusal, or device-open failure) surfaces
    /// as the `Error` state and does not trigger auto-reconnect; the next
    /// attempt is driven by the caller.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if matches!(
                *state,
                ConnectionState::Connected
                    | ConnectionState::Connecting
                    | ConnectionState::Reconnecting
            ) {
                return Err(Error::Other(format!(
                    "connect refused while {}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }
        self.shared.should_reconnect.store(true, Ordering::SeqCst);

        match ClientShared::open_generation(&self.shared)
            .and_then(|generation| ClientShared::install_generation(&self.shared, generation))
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.shared.should_reconnect.load(Ordering::SeqCst) {
                    log::error!("Connect failed: {}", e);
                    *self.shared.last_error.lock() = Some(e.to_string());
                    *self.shared.state.lock() = ConnectionState::Error;
                } else {
                    // Disconnected while dialing; that state stands
                    log::info!("Connect canceled: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Tear down the connection and abort any pending reconnect wait.
    /// Idempotent; a double disconnect is a no-op.
    pub fn disconnect(&self) {
        self.shared.should_reconnect.store(false, Ordering::SeqCst);
        let generation = self.shared.generation.lock().take();
        if let Some(generation) = generation {
            generation.running.store(false, Ordering::SeqCst);
            generation.shutdown.shutdown();
            log::info!("Disconnected from server");
        }
        *self.shared.connected_since.lock() = None;
        *self.shared.state.lock() = ConnectionState::Disconnected;
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// True while the forwarding loops are live
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Message from the most recent failed connect attempt
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Heartbeat latency statistics over the sliding window
    pub fn latency(&self) -> LatencySnapshot {
        self.shared.latency.lock().snapshot()
    }

    /// Reconnection counters
    pub fn stats(&self) -> ClientStats {
        *self.shared.stats.lock()
    }

    /// Time since the current connection was established
    pub fn connected_uptime(&self) -> Option<Duration> {
        self.shared.connected_since.lock().map(|c| c.0.elapsed())
    }

    /// Consecutive failed reconnect attempts in the current cycle
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.policy.lock().attempt()
    }

    /// Byte/frame counters of the current connection, if any
    pub fn channel_stats(&self) -> Option<ChannelStats> {
        let generation = self.shared.generation.lock().clone();
        generation.map(|g| g.channel.lock().stats())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl ClientShared {
    /// Full connect cycle: dial, wrap the channel, open the local device
    fn open_generation(shared: &Arc<ClientShared>) -> Result<Arc<Generation>> {
        log::info!("Connecting to {}", shared.options.server_addr);
        let addr = shared
            .options
            .server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Other(format!(
                    "could not resolve {}",
                    shared.options.server_addr
                ))
            })?;

        let mut link = TcpLink::connect(addr, CONNECT_TIMEOUT)?;
        link.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        let shutdown = link.shutdown_handle()?;
        let channel = FramedChannel::new(Box::new(link), MAX_RESPONSE_FRAME);

        // Device-open failure aborts the attempt; dropping the channel
        // closes the freshly opened socket
        let device = (shared.device_factory)()?;

        log::info!("Connected to {}", addr);
        Ok(Arc::new(Generation {
            channel: Mutex::new(channel),
            shutdown,
            device: Mutex::new(device),
            running: AtomicBool::new(true),
            active_loops: AtomicUsize::new(0),
        }))
    }

    /// Publish the generation as current and start its three loops.
    ///
    /// Re-checks the disconnect flag under the generation lock: an explicit
    /// disconnect issued while the connect cycle was still dialing wins, and
    /// the freshly opened generation is torn down instead of published.
    fn install_generation(shared: &Arc<ClientShared>, generation: Arc<Generation>) -> Result<()> {
        {
            let mut current = shared.generation.lock();
            if !shared.should_reconnect.load(Ordering::SeqCst) {
                generation.running.store(false, Ordering::SeqCst);
                generation.shutdown.shutdown();
                *shared.state.lock() = ConnectionState::Disconnected;
                return Err(Error::Other("canceled by disconnect".to_string()));
            }
            *current = Some(Arc::clone(&generation));
        }
        *shared.state.lock() = ConnectionState::Connected;
        *shared.connected_since.lock() = Some(ConnectedSince(Instant::now()));
        shared.policy.lock().reset();

        let loops: [(&str, fn(Arc<ClientShared>, Arc<Generation>)); 3] = [
            ("device-forward", Self::device_loop),
            ("frame-pull", Self::frame_loop),
            ("heartbeat", Self::heartbeat_loop),
        ];
        for (name, entry) in loops {
            let loop_shared = Arc::clone(shared);
            let loop_generation = Arc::clone(&generation);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || entry(loop_shared, loop_generation))
                .map_err(|e| {
                    // Roll the partial install back; already-spawned loops
                    // observe the cleared running flag and exit
                    generation.running.store(false, Ordering::SeqCst);
                    generation.shutdown.shutdown();
                    *shared.generation.lock() = None;
                    *shared.connected_since.lock() = None;
                    Error::Other(format!("failed to spawn {} loop: {}", name, e))
                })?;
        }
        log::info!("Device forwarding active");
        Ok(())
    }

    fn device_loop(shared: Arc<ClientShared>, generation: Arc<Generation>) {
        generation.active_loops.fetch_add(1, Ordering::SeqCst);
        log::info!("Device forwarding loop started");
        while generation.running.load(Ordering::Relaxed) {
            if let Err(e) = Self::device_cycle(&generation) {
                Self::on_loop_error(&shared, &generation, "device", e);
                break;
            }
            Self::generation_sleep(&generation, DEVICE_POLL_INTERVAL);
        }
        log::info!("Device forwarding loop stopped");
        generation.active_loops.fetch_sub(1, Ordering::SeqCst);
    }

    fn device_cycle(generation: &Generation) -> Result<()> {
        // Forward bytes the local application wrote to the device
        let outbound = {
            let mut device = generation.device.lock();
            if device.bytes_available()? > 0 {
                device.read_available()?
            } else {
                Vec::new()
            }
        };
        if !outbound.is_empty() {
            let reply = generation.request(&Command::SendSerial(outbound))?;
            if reply != RESP_OK {
                log::debug!("Unexpected SEND_SERIAL reply ({} bytes)", reply.len());
            }
        }

        // Pull bytes the remote device produced
        let inbound = generation.request(&Command::GetSerial)?;
        if !inbound.is_empty() {
            generation.device.lock().write(&inbound)?;
        }
        Ok(())
    }

    fn frame_loop(shared: Arc<ClientShared>, generation: Arc<Generation>) {
        generation.active_loops.fetch_add(1, Ordering::SeqCst);
        log::info!("Frame loop started");
        while generation.running.load(Ordering::Relaxed) {
            match generation.request(&Command::GetFrame) {
                Ok(frame) => {
                    if !frame.is_empty() {
                        shared.frame_sink.lock().present(&frame);
                    }
                }
                Err(e) => {
                    Self::on_loop_error(&shared, &generation, "frame", e);
                    break;
                }
            }
            Self::generation_sleep(&generation, FRAME_POLL_INTERVAL);
        }
        log::info!("Frame loop stopped");
        generation.active_loops.fetch_sub(1, Ordering::SeqCst);
    }

    fn heartbeat_loop(shared: Arc<ClientShared>, generation: Arc<Generation>) {
        generation.active_loops.fetch_add(1, Ordering::SeqCst);
        log::info!("Heartbeat loop started");
        while generation.running.load(Ordering::Relaxed) {
            if let Err(e) = Self::heartbeat_cycle(&shared, &generation) {
                Self::on_loop_error(&shared, &generation, "heartbeat", e);
                break;
            }
            Self::generation_sleep(&generation, HEARTBEAT_INTERVAL);
        }
        log::info!("Heartbeat loop stopped");
        generation.active_loops.fetch_sub(1, Ordering::SeqCst);
    }

    fn heartbeat_cycle(shared: &ClientShared, generation: &Generation) -> Result<()> {
        let started = Instant::now();
        let reply = generation.request(&Command::Ping)?;
        if reply != RESP_PONG {
            return Err(Error::Protocol(format!(
                "heartbeat expected PONG, got {} bytes",
                reply.len()
            )));
        }
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        shared.latency.lock().record(latency_ms);
        log::trace!("Heartbeat round trip: {:.2} ms", latency_ms);
        Ok(())
    }

    fn on_loop_error(
        shared: &Arc<ClientShared>,
        generation: &Arc<Generation>,
        which: &str,
        error: Error,
    ) {
        if generation.running.load(Ordering::SeqCst) {
            if error.is_connection_loss() {
                log::warn!("Connection lost ({} loop): {}", which, error);
            } else {
                log::error!("{} loop failed: {}", which, error);
            }
            Self::handle_connection_loss(shared, generation);
        } else {
            // The generation was already halted; the error is just the
            // socket closing under us
            log::debug!("{} loop unwound during teardown: {}", which, error);
        }
    }

    /// First loop to observe a failure halts the generation; later observers
    /// find `running` already cleared and do nothing.
    fn handle_connection_loss(shared: &Arc<ClientShared>, generation: &Arc<Generation>) {
        if !generation.running.swap(false, Ordering::SeqCst) {
            return;
        }
        generation.shutdown.shutdown();
        *shared.connected_since.lock() = None;

        {
            let mut current = shared.generation.lock();
            if let Some(active) = current.as_ref() {
                if Arc::ptr_eq(active, generation) {
                    *current = None;
                }
            }
        }

        let auto = shared.options.auto_reconnect && shared.should_reconnect.load(Ordering::SeqCst);
        if !auto {
            *shared.state.lock() = ConnectionState::Disconnected;
            return;
        }

        *shared.state.lock() = ConnectionState::Reconnecting;
        shared.stats.lock().reconnections += 1;
        if !shared.reconnecting.swap(true, Ordering::SeqCst) {
            let thread_shared = Arc::clone(shared);
            let previous = Arc::clone(generation);
            let spawned = thread::Builder::new()
                .name("reconnect".to_string())
                .spawn(move || Self::reconnect_loop(thread_shared, previous));
            if let Err(e) = spawned {
                log::error!("Failed to spawn reconnect thread: {}", e);
                shared.reconnecting.store(false, Ordering::SeqCst);
                *shared.state.lock() = ConnectionState::Disconnected;
            }
        }
    }

    fn reconnect_loop(shared: Arc<ClientShared>, previous: Arc<Generation>) {
        log::info!("Auto-reconnect engaged");

        // Every loop of the previous generation must stand down before a new
        // generation may own the device handle
        while previous.active_loops.load(Ordering::SeqCst) > 0 {
            thread::sleep(Duration::from_millis(10));
        }

        loop {
            if !shared.should_reconnect.load(Ordering::SeqCst) {
                *shared.state.lock() = ConnectionState::Disconnected;
                break;
            }

            let (delay, attempt) = {
                let policy = shared.policy.lock();
                (policy.next_delay(), policy.attempt())
            };
            log::info!(
                "Reconnecting in {:.1}s (attempt {})",
                delay.as_secs_f64(),
                attempt + 1
            );
            if !Self::cancellable_wait(&shared, delay) {
                *shared.state.lock() = ConnectionState::Disconnected;
                break;
            }

            let generation = match Self::open_generation(&shared) {
                Ok(generation) => generation,
                Err(e) => {
                    log::warn!("Reconnect attempt failed: {}", e);
                    shared.policy.lock().record_failure();
                    shared.stats.lock().reconnect_attempts += 1;
                    continue;
                }
            };

            // Hand the single-retry-thread guard back before the new loops
            // go live: a loss in the fresh generation must be able to spawn
            // its own retry thread instead of finding the guard still held
            // and stranding the client in Reconnecting
            shared.reconnecting.store(false, Ordering::SeqCst);
            match Self::install_generation(&shared, generation) {
                Ok(()) => {
                    log::info!("Reconnection successful");
                    return;
                }
                Err(e) => {
                    log::warn!("Reconnect attempt failed: {}", e);
                    if shared.reconnecting.swap(true, Ordering::SeqCst) {
                        // A loss handler already started a newer retry thread
                        return;
                    }
                    if shared.should_reconnect.load(Ordering::SeqCst) {
                        *shared.state.lock() = ConnectionState::Reconnecting;
                    }
                    shared.policy.lock().record_failure();
                    shared.stats.lock().reconnect_attempts += 1;
                }
            }
        }

        shared.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Sleep for `total`, waking early if reconnection is canceled.
    /// Returns false when canceled.
    fn cancellable_wait(shared: &ClientShared, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if !shared.should_reconnect.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(CANCEL_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
        shared.should_reconnect.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking early when the generation halts
    fn generation_sleep(generation: &Generation, total: Duration) {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if !generation.running.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(CANCEL_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}
