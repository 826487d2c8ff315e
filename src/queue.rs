//! Priority command queue and the serial write dispatcher
//!
//! All `SEND_SERIAL` writes from every session funnel through one bounded
//! queue ordered by `(priority, enqueue sequence)`. A single consumer thread
//! drains it into the physical device so multi-client write ordering is
//! governed solely by priority, never by arrival interleaving. Synchronous
//! reads (`GET_SERIAL`, `GET_FRAME`) never enter this queue.

use crate::device::SerialDevice;
use crate::error::{Error, Result};
use crate::protocol::Priority;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default queue capacity
pub const QUEUE_CAPACITY: usize = 100;

/// Pause between consecutive device writes; protects devices that cannot
/// absorb back-to-back commands
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(10);

struct QueuedWrite {
    priority: Priority,
    seq: u64,
    payload: Vec<u8>,
}

impl QueuedWrite {
    fn key(&self) -> (Priority, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedWrite {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedWrite {}

impl PartialOrd for QueuedWrite {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedWrite {
    // Reversed so BinaryHeap pops the lowest (priority, seq) first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

struct QueueInner {
    heap: BinaryHeap<QueuedWrite>,
    next_seq: u64,
}

/// Bounded priority queue for serial writes.
///
/// `enqueue` never blocks the calling session thread: a full queue rejects
/// the item with [`Error::QueueFull`], except that an EMERGENCY item evicts
/// the worst-ranked queued item instead of being dropped. Ordering is
/// re-evaluated at every dequeue, so a late EMERGENCY item always overtakes
/// everything already queued.
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue holding at most `capacity` pending writes
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a write without blocking
    pub fn enqueue(&self, priority: Priority, payload: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.heap.len() >= self.capacity {
            if priority != Priority::Emergency {
                return Err(Error::QueueFull);
            }
            // Emergency writes are never starved: make room by dropping the
            // worst-ranked pending item (highest priority number, latest seq)
            let mut items = std::mem::take(&mut inner.heap).into_vec();
            if let Some(worst) = items
                .iter()
                .enumerate()
                .max_by_key(|(_, item)| item.key())
                .map(|(i, _)| i)
            {
                let dropped = items.swap_remove(worst);
                log::warn!(
                    "Queue full, dropping {:?} write of {} bytes for emergency command",
                    dropped.priority,
                    dropped.payload.len()
                );
            }
            inner.heap = BinaryHeap::from(items);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedWrite {
            priority,
            seq,
            payload,
        });
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the highest-priority, earliest item, waiting up to `timeout`
    /// while the queue is empty
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        if inner.heap.is_empty() {
            self.available.wait_for(&mut inner, timeout);
        }
        inner.heap.pop().map(|item| item.payload)
    }

    /// Number of pending writes
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all pending writes
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.heap.len();
        inner.heap.clear();
        if dropped > 0 {
            log::info!("Cleared {} pending serial writes", dropped);
        }
    }
}

/// Dedicated consumer thread draining the queue into the device
pub struct WriteDispatcher {
    queue: Arc<CommandQueue>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WriteDispatcher {
    /// Spawn the consumer thread
    pub fn start(
        queue: Arc<CommandQueue>,
        device: Arc<Mutex<Box<dyn SerialDevice>>>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_queue = Arc::clone(&queue);

        let handle = thread::Builder::new()
            .name("serial-writer".to_string())
            .spawn(move || {
                log::info!("Serial write dispatcher started");
                while thread_running.load(Ordering::Relaxed) {
                    let Some(payload) =
                        thread_queue.dequeue_timeout(Duration::from_millis(100))
                    else {
                        continue;
                    };
                    if let Err(e) = device.lock().write(&payload) {
                        log::error!("Device write failed: {}", e);
                    } else {
                        log::trace!("Wrote {} bytes to device", payload.len());
                    }
                    thread::sleep(INTER_COMMAND_DELAY);
                }
                log::info!("Serial write dispatcher stopped");
            })
            .map_err(|e| Error::Other(format!("failed to spawn dispatcher: {}", e)))?;

        Ok(WriteDispatcher {
            queue,
            running,
            handle: Some(handle),
        })
    }

    /// Stop the consumer and discard pending writes. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.queue.clear();
    }
}

impl Drop for WriteDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
