//! Per-client session loop
//!
//! One thread per connected client, blocking reads with a short timeout so
//! the server's running flag is observed. Each decoded command refreshes the
//! session's last-seen stamp and is answered synchronously on the same
//! channel; only `SEND_SERIAL` detours through the priority queue.

use crate::device::SerialDevice;
use crate::error::{Error, Result};
use crate::protocol::{classify, Command, RESP_OK, RESP_PONG};
use crate::queue::CommandQueue;
use crate::server::frames::FrameBuffer;
use crate::server::registry::SessionRegistry;
use crate::transport::FramedChannel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct Session {
    id: u64,
    channel: FramedChannel,
    device: Arc<Mutex<Box<dyn SerialDevice>>>,
    queue: Arc<CommandQueue>,
    frames: Arc<FrameBuffer>,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        channel: FramedChannel,
        device: Arc<Mutex<Box<dyn SerialDevice>>>,
        queue: Arc<CommandQueue>,
        frames: Arc<FrameBuffer>,
        registry: Arc<SessionRegistry>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Session {
            id,
            channel,
            device,
            queue,
            frames,
            registry,
            running,
        }
    }

    /// Run the request/response loop until disconnect, shutdown, or a
    /// protocol violation. The caller deregisters the session afterwards.
    pub(crate) fn run(mut self) -> Result<()> {
        log::debug!("Session loop started for Client-{}", self.id);
        let outcome = self.serve();
        let stats = self.channel.stats();
        log::info!(
            "Client-{} session ended: {} commands in ({} B), {} replies out ({} B)",
            self.id,
            stats.frames_received,
            stats.bytes_received,
            stats.frames_sent,
            stats.bytes_sent
        );
        outcome
    }

    fn serve(&mut self) -> Result<()> {
        loop {
            if !self.running.load(Ordering::Relaxed) {
                log::debug!("Client-{}: server stopping, exiting", self.id);
                break;
            }

            let raw = match self.channel.receive() {
                Ok(raw) => raw,
                Err(Error::ReceiveTimeout) => continue,
                Err(Error::ChannelClosed) => {
                    log::info!("Client-{} disconnected", self.id);
                    break;
                }
                Err(e) => {
                    log::error!("Client-{}: read failed: {}", self.id, e);
                    return Err(e);
                }
            };

            let command = match Command::parse(&raw) {
                Ok(command) => command,
                Err(e) => {
                    // Malformed traffic is fatal to this one session, never ignored
                    log::error!("Client-{}: {}", self.id, e);
                    return Err(e);
                }
            };

            self.registry.touch(self.id);

            let reply = self.execute(command)?;
            self.channel.send(&reply)?;
        }

        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<Vec<u8>> {
        match command {
            Command::Ping => Ok(RESP_PONG.to_vec()),

            Command::GetSerial => {
                // Drains only what is already buffered; never waits for the device
                let mut device = self.device.lock();
                if device.bytes_available()? > 0 {
                    device.read_available()
                } else {
                    Ok(Vec::new())
                }
            }

            Command::SendSerial(payload) => {
                let priority = classify(&payload);
                log::debug!(
                    "Client-{}: queueing {} byte write as {:?}",
                    self.id,
                    payload.len(),
                    priority
                );
                match self.queue.enqueue(priority, payload) {
                    Ok(()) => {}
                    Err(Error::QueueFull) => {
                        // Bounded backpressure: drop the write, still
                        // acknowledge so the client's device loop never stalls
                        log::warn!("Client-{}: command queue full, write dropped", self.id);
                    }
                    Err(e) => return Err(e),
                }
                Ok(RESP_OK.to_vec())
            }

            Command::GetFrame => Ok(self.frames.take_latest().unwrap_or_default()),
        }
    }
}
