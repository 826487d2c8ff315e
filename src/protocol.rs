//! Command vocabulary and priority classification
//!
//! # Wire Protocol Specification
//!
//! Every message on the wire is length-prefixed:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ Command or response      │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Client→server payloads are UTF-8 text: one of the four command tokens,
//! with `SEND_SERIAL` carrying raw device bytes after the first `:`, encoded
//! one character per byte so arbitrary binary survives the text layer.
//! Server→client payloads are raw bytes and may be empty.
//!
//! | Command                | Reply                                  |
//! |------------------------|----------------------------------------|
//! | `PING`                 | `PONG`                                 |
//! | `GET_SERIAL`           | buffered device bytes (may be empty)   |
//! | `SEND_SERIAL:<bytes>`  | `OK` (always, even if the write drops) |
//! | `GET_FRAME`            | latest JPEG frame (may be empty)       |
//!
//! There is no protocol version negotiation; both ends agree on the
//! vocabulary out of band. Any other token, or a payload that is not valid
//! UTF-8, is a protocol violation and is fatal to that session.

use crate::error::{Error, Result};

/// Default TCP port for the bridge protocol
pub const DEFAULT_PORT: u16 = 5555;

/// Maximum inbound frame size on the server (commands are small)
pub const MAX_COMMAND_FRAME: usize = 1024 * 1024;

/// Maximum inbound frame size on the client (responses carry JPEG frames)
pub const MAX_RESPONSE_FRAME: usize = 10 * 1024 * 1024;

/// Reply to `PING`
pub const RESP_PONG: &[u8] = b"PONG";

/// Reply to `SEND_SERIAL`
pub const RESP_OK: &[u8] = b"OK";

const SEND_SERIAL_PREFIX: &str = "SEND_SERIAL:";

/// One decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe
    Ping,
    /// Pull any buffered device-output bytes (never blocks on the device)
    GetSerial,
    /// Push bytes to the device, consumed exactly once
    SendSerial(Vec<u8>),
    /// Pull the latest compressed camera frame
    GetFrame,
}

impl Command {
    /// Encode the command for the wire.
    ///
    /// `SEND_SERIAL` payload bytes are widened one byte per character so the
    /// result is always valid UTF-8 regardless of the device data.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Ping => b"PING".to_vec(),
            Command::GetSerial => b"GET_SERIAL".to_vec(),
            Command::GetFrame => b"GET_FRAME".to_vec(),
            Command::SendSerial(payload) => {
                let mut text = String::with_capacity(SEND_SERIAL_PREFIX.len() + payload.len());
                text.push_str(SEND_SERIAL_PREFIX);
                for &b in payload {
                    text.push(b as char);
                }
                text.into_bytes()
            }
        }
    }

    /// Parse a command frame received from a client.
    ///
    /// Returns [`Error::Protocol`] for anything outside the fixed vocabulary;
    /// the caller treats that as fatal to the session.
    pub fn parse(raw: &[u8]) -> Result<Command> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::Protocol("command is not valid UTF-8".to_string()))?;

        if let Some(encoded) = text.strip_prefix(SEND_SERIAL_PREFIX) {
            let mut payload = Vec::with_capacity(encoded.len());
            for c in encoded.chars() {
                let code = c as u32;
                if code > 0xFF {
                    return Err(Error::Protocol(format!(
                        "serial payload contains non-byte character U+{:04X}",
                        code
                    )));
                }
                payload.push(code as u8);
            }
            return Ok(Command::SendSerial(payload));
        }

        match text.trim() {
            "PING" => Ok(Command::Ping),
            "GET_SERIAL" => Ok(Command::GetSerial),
            "GET_FRAME" => Ok(Command::GetFrame),
            other => Err(Error::Protocol(format!(
                "unknown command token: {:?}",
                truncate_for_log(other)
            ))),
        }
    }
}

/// Priority classes for queued serial writes.
///
/// Lower value dequeues first; ties break FIFO by enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Emergency stop, safety interlocks
    Emergency = 0,
    /// Motion commands (G-code)
    High = 1,
    /// Regular serial data
    Normal = 5,
    /// Status queries
    Low = 10,
}

/// Classify a `SEND_SERIAL` payload into a priority class.
///
/// An emergency-stop token (`M112` or `!`) anywhere in the payload takes the
/// EMERGENCY class; a G-code prefix (`G` or `M`) takes HIGH; everything else
/// is NORMAL.
pub fn classify(payload: &[u8]) -> Priority {
    if contains(payload, b"M112") || payload.contains(&b'!') {
        Priority::Emergency
    } else if matches!(payload.first(), Some(b'G') | Some(b'M')) {
        Priority::High
    } else {
        Priority::Normal
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 32;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_tokens() {
        assert_eq!(Command::parse(b"PING").unwrap(), Command::Ping);
        assert_eq!(Command::parse(b"GET_SERIAL").unwrap(), Command::GetSerial);
        assert_eq!(Command::parse(b"GET_FRAME").unwrap(), Command::GetFrame);
    }

    #[test]
    fn test_parse_unknown_token_is_violation() {
        assert!(matches!(
            Command::parse(b"REBOOT"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Command::parse(&[0xFF, 0xFE]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_send_serial_roundtrip_preserves_binary() {
        // Every byte value must survive the text encoding unmodified
        let payload: Vec<u8> = (0u8..=255).collect();
        let wire = Command::SendSerial(payload.clone()).encode();
        assert!(std::str::from_utf8(&wire).is_ok());
        match Command::parse(&wire).unwrap() {
            Command::SendSerial(decoded) => assert_eq!(decoded, payload),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_send_serial_keeps_trailing_whitespace() {
        let wire = Command::SendSerial(b"G1 X10\n".to_vec()).encode();
        match Command::parse(&wire).unwrap() {
            Command::SendSerial(decoded) => assert_eq!(decoded, b"G1 X10\n"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_classify_emergency() {
        assert_eq!(classify(b"M112"), Priority::Emergency);
        assert_eq!(classify(b"G1 X10 ; M112 follows"), Priority::Emergency);
        assert_eq!(classify(b"!stop"), Priority::Emergency);
    }

    #[test]
    fn test_classify_motion_and_normal() {
        assert_eq!(classify(b"G1 X10"), Priority::High);
        assert_eq!(classify(b"M3 S1000"), Priority::High);
        assert_eq!(classify(b"status?"), Priority::Normal);
        assert_eq!(classify(b""), Priority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Emergency < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }
}
