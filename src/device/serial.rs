//! Serial port device implementation

use super::SerialDevice;
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Physical (or virtual) serial port opened through the OS driver
pub struct SerialPortDevice {
    path: String,
    port: Box<dyn SerialPort>,
}

impl SerialPortDevice {
    /// Open a serial port at 8N1 with a short read timeout.
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0", "COM10")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| Error::DeviceOpen(format!("{}: {}", path, e)))?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SerialPortDevice {
            path: path.to_string(),
            port,
        })
    }
}

impl SerialDevice for SerialPortDevice {
    fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self.bytes_available()?;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; pending];
        match self.port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(Error::DeviceIo(format!("{}: {}", self.path, e))),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map_err(|e| Error::DeviceIo(format!("{}: {}", self.path, e)))
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| Error::DeviceIo(format!("{}: {}", self.path, e)))
    }
}

impl Drop for SerialPortDevice {
    fn drop(&mut self) {
        log::debug!("Closing serial port: {}", self.path);
    }
}
