//! Configuration for the bridge binaries
//!
//! One TOML file with a `[server]` and a `[client]` section, so a machine
//! that runs both roles keeps a single file. Each binary reads only its own
//! section.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Name announced to discovery
    pub server_name: String,
    /// TCP bind address, e.g. `0.0.0.0:5555`
    pub bind_address: String,
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub serial_port: String,
    /// Serial baud rate
    pub baud_rate: u32,
}

/// Client-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub server_address: String,
    /// Local serial device the remote traffic is bridged to
    pub device_port: String,
    /// Serial baud rate for the local device
    pub baud_rate: u32,
    /// Reconnect automatically after connection loss
    pub auto_reconnect: bool,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnection backoff parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Retry delay ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction applied to each delay (0.1 = ±10%)
    pub jitter: f64,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name: "setu-server".to_string(),
            bind_address: format!("0.0.0.0:{}", crate::protocol::DEFAULT_PORT),
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_address: format!("127.0.0.1:{}", crate::protocol::DEFAULT_PORT),
            device_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: 0.1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Parse the config path from command line arguments.
///
/// Supports:
/// - `<binary> <path>` (positional)
/// - `<binary> --config <path>` (flag-based)
/// - `<binary> -c <path>` (short flag)
///
/// Falls back to `default_path` if not specified.
pub fn config_path_from_args(default_path: &str) -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    default_path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:5555");
        assert_eq!(config.server.baud_rate, 115_200);
        assert_eq!(config.client.server_address, "127.0.0.1:5555");
        assert!(config.client.auto_reconnect);
        assert_eq!(config.client.reconnect.base_delay_ms, 1000);
        assert_eq!(config.client.reconnect.max_delay_ms, 60_000);
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[server]"));
        assert!(toml_string.contains("[client]"));
        assert!(toml_string.contains("[client.reconnect]"));
        assert!(toml_string.contains("bind_address = \"0.0.0.0:5555\""));
        assert!(toml_string.contains("baud_rate = 115200"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[server]
server_name = "workshop"
bind_address = "0.0.0.0:6000"
serial_port = "/dev/ttyACM0"
baud_rate = 250000

[client]
server_address = "192.168.1.50:6000"
device_port = "/dev/ttyUSB1"
baud_rate = 250000
auto_reconnect = false

[client.reconnect]
base_delay_ms = 500
max_delay_ms = 30000
jitter = 0.2
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.server_name, "workshop");
        assert_eq!(config.server.baud_rate, 250_000);
        assert_eq!(config.client.server_address, "192.168.1.50:6000");
        assert!(!config.client.auto_reconnect);
        assert_eq!(config.client.reconnect.base_delay(), Duration::from_millis(500));
        assert_eq!(config.client.reconnect.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:5555");
        assert_eq!(config.client.reconnect.jitter, 0.1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join("setu-link-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("setu.toml");

        let mut config = Config::default();
        config.server.server_name = "bench".to_string();
        config.client.reconnect.base_delay_ms = 250;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.server_name, "bench");
        assert_eq!(loaded.client.reconnect.base_delay_ms, 250);

        std::fs::remove_file(&path).ok();
    }
}
