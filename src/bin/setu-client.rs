//! Bridge client daemon: connects a local serial device to a remote bridge
//! server and keeps the link alive.

use setu_link::client::{Client, ClientOptions, DiscardFrameSink};
use setu_link::config::{config_path_from_args, Config};
use setu_link::device::{SerialDevice, SerialPortDevice};
use setu_link::error::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SetuLink client v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = config_path_from_args("/etc/setu-link.toml");
    let config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        Config::load(&config_path)?
    } else {
        log::warn!("Config {} not found, using defaults", config_path);
        Config::default()
    };
    let client_config = config.client;

    let options = ClientOptions {
        server_addr: client_config.server_address.clone(),
        auto_reconnect: client_config.auto_reconnect,
        base_delay: client_config.reconnect.base_delay(),
        max_delay: client_config.reconnect.max_delay(),
        jitter: client_config.reconnect.jitter,
    };

    // A fresh device handle per connection generation, so a reconnect
    // recovers from a replugged adapter as well
    let device_port = client_config.device_port.clone();
    let baud_rate = client_config.baud_rate;
    let client = Client::new(
        options,
        Box::new(move || {
            Ok(Box::new(SerialPortDevice::open(&device_port, baud_rate)?)
                as Box<dyn SerialDevice>)
        }),
        Box::new(DiscardFrameSink),
    );

    client.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut last_status = std::time::Instant::now();
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
        if last_status.elapsed() >= Duration::from_secs(30) {
            last_status = std::time::Instant::now();
            let latency = client.latency();
            log::info!(
                "Status: {} | latency {:.1} ms (avg {:.1} ms over {} samples) | {} reconnection(s)",
                client.state(),
                latency.latest_ms,
                latency.avg_ms,
                latency.samples,
                client.stats().reconnections
            );
        }
    }

    client.disconnect();
    log::info!("SetuLink client stopped");
    Ok(())
}
