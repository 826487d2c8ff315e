//! Camera frame buffering: latest-frame-wins handoff between the capture
//! thread and session threads
//!
//! The capture collaborator produces compressed (JPEG) frames; sessions pull
//! the most recent one on `GET_FRAME`. The buffer holds two slots and the
//! producer overwrites rather than blocks, so a slow client only ever costs
//! staleness, never backpressure into the capture loop.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Poll interval for the capture loop (~30 FPS)
pub const CAPTURE_INTERVAL: Duration = Duration::from_millis(33);

/// Produces compressed camera frames.
///
/// Implemented by the camera/JPEG collaborator; the core treats frames as
/// opaque byte buffers.
pub trait FrameSource: Send {
    /// The newest compressed frame, or `None` when nothing new is available
    fn latest_frame(&mut self) -> Option<Vec<u8>>;
}

/// Frame source for servers with no camera attached; `GET_FRAME` replies
/// stay empty
pub struct NullFrameSource;

impl FrameSource for NullFrameSource {
    fn latest_frame(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Two-slot latest-wins frame buffer
pub struct FrameBuffer {
    slots: ArrayQueue<Vec<u8>>,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        FrameBuffer {
            slots: ArrayQueue::new(2),
        }
    }

    /// Publish a frame, overwriting the oldest slot when full
    pub fn publish(&self, frame: Vec<u8>) {
        if let Err(frame) = self.slots.push(frame) {
            let _ = self.slots.pop();
            let _ = self.slots.push(frame);
        }
    }

    /// Take the most recent frame, discarding any older one
    pub fn take_latest(&self) -> Option<Vec<u8>> {
        let mut latest = None;
        while let Some(frame) = self.slots.pop() {
            latest = Some(frame);
        }
        latest
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture loop body: poll the source and publish into the buffer until the
/// running flag clears
pub fn capture_loop(
    mut source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) {
    log::info!("Camera capture loop started");
    while running.load(Ordering::Relaxed) {
        if let Some(frame) = source.latest_frame() {
            log::trace!("Captured frame of {} bytes", frame.len());
            buffer.publish(frame);
        }
        thread::sleep(CAPTURE_INTERVAL);
    }
    log::info!("Camera capture loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_yields_none() {
        let buffer = FrameBuffer::new();
        assert!(buffer.take_latest().is_none());
    }

    #[test]
    fn test_take_returns_newest_and_drains() {
        let buffer = FrameBuffer::new();
        buffer.publish(vec![1]);
        buffer.publish(vec![2]);
        assert_eq!(buffer.take_latest(), Some(vec![2]));
        assert!(buffer.take_latest().is_none());
    }

    #[test]
    fn test_publish_overwrites_instead_of_blocking() {
        let buffer = FrameBuffer::new();
        for i in 0..10u8 {
            buffer.publish(vec![i]);
        }
        assert_eq!(buffer.take_latest(), Some(vec![9]));
    }
}
