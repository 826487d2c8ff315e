//! Device layer: the serial endpoint each side of the bridge forwards to
//!
//! The server opens the physical device; the client opens the local virtual
//! port the user's application talks to. Both sides poll with a non-blocking
//! "bytes available" query rather than blocking reads.

use crate::error::Result;

mod serial;
pub use serial::SerialPortDevice;

mod mock;
pub use mock::MockDevice;

/// Byte-in/byte-out serial device
pub trait SerialDevice: Send {
    /// Read and return all currently buffered bytes without blocking.
    /// Returns an empty vector when nothing is buffered.
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Write bytes to the device
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Number of bytes buffered for reading
    fn bytes_available(&mut self) -> Result<usize>;
}

/// Factory invoked once per connection generation so a fresh device handle
/// is opened after every reconnect
pub type DeviceFactory = Box<dyn Fn() -> Result<Box<dyn SerialDevice>> + Send + Sync>;
