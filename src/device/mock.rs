//! Mock serial device for testing

use super::SerialDevice;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Mock device backed by shared in-memory buffers.
///
/// Clones share state, so a test can hold one handle while the component
/// under test owns another: `push_output` stages bytes the device "produced"
/// and `written` observes everything the component wrote to it.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Mutex<MockDeviceInner>>,
}

struct MockDeviceInner {
    output: VecDeque<u8>,
    written: Vec<u8>,
}

impl MockDevice {
    /// Create a new mock device
    pub fn new() -> Self {
        MockDevice {
            inner: Arc::new(Mutex::new(MockDeviceInner {
                output: VecDeque::new(),
                written: Vec::new(),
            })),
        }
    }

    /// Stage bytes as if the device produced them
    pub fn push_output(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.output.extend(data.iter().copied());
    }

    /// All bytes written to the device so far
    pub fn written(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.written.clone()
    }

    /// Discard recorded writes
    pub fn clear_written(&self) {
        let mut inner = self.inner.lock();
        inner.written.clear();
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialDevice for MockDevice {
    fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        Ok(inner.output.drain(..).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.written.extend_from_slice(data);
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let inner = self.inner.lock();
        Ok(inner.output.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_consumed_once() {
        let handle = MockDevice::new();
        let mut device: Box<dyn SerialDevice> = Box::new(handle.clone());

        handle.push_output(b"ok\r\n");
        assert_eq!(device.bytes_available().unwrap(), 4);
        assert_eq!(device.read_available().unwrap(), b"ok\r\n");
        assert_eq!(device.bytes_available().unwrap(), 0);
        assert!(device.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_writes_visible_through_clone() {
        let handle = MockDevice::new();
        let mut device: Box<dyn SerialDevice> = Box::new(handle.clone());

        device.write(b"G28\n").unwrap();
        device.write(b"G1 X10\n").unwrap();
        assert_eq!(handle.written(), b"G28\nG1 X10\n");
    }
}
