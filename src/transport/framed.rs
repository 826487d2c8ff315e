//! Length-prefixed framed channel
//!
//! One frame = 4-byte big-endian length followed by that many payload bytes.
//! The receiver never interprets payload bytes until the declared length has
//! been fully read, and a declared length above the configured cap terminates
//! the connection before any payload byte is consumed.

use crate::error::{Error, Result};
use crate::transport::{Link, ShutdownHandle};
use std::io::ErrorKind;
use std::time::Duration;

/// Byte and frame counters, updated on every successful send/receive.
///
/// Statistics only; not part of protocol correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
}

/// Framed request/response channel over a [`Link`]
pub struct FramedChannel {
    link: Box<dyn Link>,
    max_frame: usize,
    write_buf: Vec<u8>,
    stats: ChannelStats,
}

impl FramedChannel {
    /// Wrap a link, capping inbound frames at `max_frame` payload bytes
    pub fn new(link: Box<dyn Link>, max_frame: usize) -> Self {
        FramedChannel {
            link,
            max_frame,
            write_buf: Vec::with_capacity(256),
            stats: ChannelStats::default(),
        }
    }

    /// Send one frame.
    ///
    /// The length prefix and payload are assembled into a single buffer and
    /// written with one `write_all`, so two frames sent through the same
    /// channel instance can never interleave on the wire.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
            len: payload.len(),
            cap: u32::MAX as usize,
        })?;

        self.write_buf.clear();
        self.write_buf.reserve(4 + payload.len());
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(payload);

        self.link.write_all(&self.write_buf)?;
        self.link.flush()?;

        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Receive exactly one frame.
    ///
    /// Fails with [`Error::ChannelClosed`] if the peer closes before the
    /// prefix or payload is fully read, [`Error::FrameTooLarge`] if the
    /// declared length exceeds the cap, or [`Error::ReceiveTimeout`] if no
    /// data arrives within the link's read timeout.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.link
            .read_exact(&mut len_buf)
            .map_err(map_read_error)?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame {
            return Err(Error::FrameTooLarge {
                len,
                cap: self.max_frame,
            });
        }

        let mut payload = vec![0u8; len];
        self.link
            .read_exact(&mut payload)
            .map_err(map_read_error)?;

        self.stats.bytes_received += (4 + len) as u64;
        self.stats.frames_received += 1;
        Ok(payload)
    }

    /// Bound the time a single receive may block
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.link.set_read_timeout(timeout)
    }

    /// Handle that can terminate the underlying link from another thread
    pub fn shutdown_handle(&self) -> Result<Box<dyn ShutdownHandle>> {
        self.link.shutdown_handle()
    }

    /// Peer identity for logging
    pub fn peer_label(&self) -> String {
        self.link.peer_label()
    }

    /// Snapshot of the byte/frame counters
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

fn map_read_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            Error::ChannelClosed
        }
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::ReceiveTimeout,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;

    fn channel_pair(max_frame: usize) -> (FramedChannel, FramedChannel) {
        let (a, b) = MockLink::pair();
        (
            FramedChannel::new(Box::new(a), max_frame),
            FramedChannel::new(Box::new(b), max_frame),
        )
    }

    #[test]
    fn test_roundtrip_various_sizes() {
        let (mut tx, mut rx) = channel_pair(1024 * 1024);
        for size in [0usize, 1, 2, 255, 256, 4096, 65_537] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            tx.send(&payload).unwrap();
            let received = rx.receive().unwrap();
            assert_eq!(received, payload, "size {}", size);
        }
    }

    #[test]
    fn test_frames_do_not_bleed_into_each_other() {
        let (mut tx, mut rx) = channel_pair(1024);
        tx.send(b"first").unwrap();
        tx.send(b"second").unwrap();
        assert_eq!(rx.receive().unwrap(), b"first");
        assert_eq!(rx.receive().unwrap(), b"second");
    }

    #[test]
    fn test_oversized_frame_rejected_before_payload_consumed() {
        let (a, b) = MockLink::pair();
        let mut rx = FramedChannel::new(Box::new(b), 16);

        // Hand-craft a frame declaring 1000 bytes of payload
        let mut raw = a;
        use std::io::{Read, Write};
        raw.write_all(&1000u32.to_be_bytes()).unwrap();
        raw.write_all(&[0xAA; 1000]).unwrap();

        match rx.receive() {
            Err(Error::FrameTooLarge { len: 1000, cap: 16 }) => {}
            other => panic!("expected FrameTooLarge, got {:?}", other.map(|v| v.len())),
        }

        // The oversized payload bytes were not consumed by the failed receive
        let mut leftover = [0u8; 4];
        rx.link.read_exact(&mut leftover).unwrap();
        assert_eq!(leftover, [0xAA; 4]);
    }

    #[test]
    fn test_peer_close_yields_channel_closed() {
        let (a, b) = MockLink::pair();
        let mut rx = FramedChannel::new(Box::new(b), 1024);
        drop(a);
        assert!(matches!(rx.receive(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_truncated_payload_yields_channel_closed() {
        let (a, b) = MockLink::pair();
        let mut rx = FramedChannel::new(Box::new(b), 1024);
        let mut raw = a;
        use std::io::Write;
        raw.write_all(&100u32.to_be_bytes()).unwrap();
        raw.write_all(b"short").unwrap();
        drop(raw);
        assert!(matches!(rx.receive(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_empty_channel_times_out() {
        let (_a, b) = MockLink::pair();
        let mut rx = FramedChannel::new(Box::new(b), 1024);
        assert!(matches!(rx.receive(), Err(Error::ReceiveTimeout)));
    }

    #[test]
    fn test_stats_track_bytes_and_frames() {
        let (mut tx, mut rx) = channel_pair(1024);
        tx.send(b"hello").unwrap();
        rx.receive().unwrap();
        assert_eq!(tx.stats().frames_sent, 1);
        assert_eq!(tx.stats().bytes_sent, 9);
        assert_eq!(rx.stats().frames_received, 1);
        assert_eq!(rx.stats().bytes_received, 9);
    }
}
