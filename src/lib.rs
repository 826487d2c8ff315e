//! SetuLink - Serial device and camera bridging over TCP
//!
//! A server attaches to a local serial device (and optionally a camera) and
//! exposes both over a single length-prefixed TCP channel. A client connects,
//! forwards traffic between that channel and a serial device on its own
//! machine, pulls camera frames, and keeps the link alive with heartbeats and
//! automatic reconnection.

pub mod client;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use client::{Client, ClientOptions, ConnectionState};
pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
