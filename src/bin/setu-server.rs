//! Bridge server daemon: exposes a local serial device (and camera, when
//! one is wired in) to remote clients over TCP.

use setu_link::config::{config_path_from_args, Config};
use setu_link::device::SerialPortDevice;
use setu_link::error::{Error, Result};
use setu_link::server::{NullFrameSource, Server};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SetuLink server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = config_path_from_args("/etc/setu-link.toml");
    let config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        Config::load(&config_path)?
    } else {
        log::warn!("Config {} not found, using defaults", config_path);
        Config::default()
    };
    let server_config = config.server;

    let device = SerialPortDevice::open(&server_config.serial_port, server_config.baud_rate)?;

    // Headless deployment: no camera attached, frame requests answer empty
    let mut server = Server::start(
        &server_config.bind_address,
        Box::new(device),
        Box::new(NullFrameSource),
    )?;
    log::info!(
        "Serving {} as '{}' on {}",
        server_config.serial_port,
        server_config.server_name,
        server.local_addr()
    );

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
            log::info!(
                "Status: {} session(s), {} queued write(s), up {}s",
                server.session_count(),
                server.queued_writes(),
                server.uptime().as_secs()
            );
        }
    }

    server.stop();
    log::info!("SetuLink server stopped");
    Ok(())
}
