//! Error types for SetuLink

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuLink error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection before a full frame was read
    #[error("Channel closed by peer")]
    ChannelClosed,

    /// Declared frame length exceeds the configured cap
    #[error("Frame of {len} bytes exceeds cap of {cap} bytes")]
    FrameTooLarge {
        /// Declared payload length
        len: usize,
        /// Configured maximum
        cap: usize,
    },

    /// No data arrived within the bounded read timeout
    #[error("Receive timed out")]
    ReceiveTimeout,

    /// Device could not be opened during a connect attempt
    #[error("Failed to open device: {0}")]
    DeviceOpen(String),

    /// Device read/write failure after a successful open
    #[error("Device I/O failure: {0}")]
    DeviceIo(String),

    /// Unknown or malformed command on the wire
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Priority queue is at capacity (non-fatal, the write is dropped)
    #[error("Command queue full")]
    QueueFull,

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be encoded
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that mean the current connection generation is dead
    /// and the reconnection manager should take over.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Error::ChannelClosed | Error::ReceiveTimeout | Error::Io(_)
        )
    }
}
