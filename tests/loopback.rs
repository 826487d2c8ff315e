//! End-to-end tests: real server and client over localhost TCP with mock
//! serial devices on both sides.

use parking_lot::Mutex;
use setu_link::client::{Client, ClientOptions, ConnectionState, FrameSink};
use setu_link::device::{MockDevice, SerialDevice};
use setu_link::server::{FrameSource, Server, ServerTuning};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const JPEG_STUB: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

/// Frame source that always has the same frame ready
struct StaticFrameSource(Vec<u8>);

impl FrameSource for StaticFrameSource {
    fn latest_frame(&mut self) -> Option<Vec<u8>> {
        Some(self.0.clone())
    }
}

/// Frame sink that records everything presented to it
#[derive(Clone)]
struct CollectingSink(Arc<Mutex<Vec<Vec<u8>>>>);

impl CollectingSink {
    fn new() -> Self {
        CollectingSink(Arc::new(Mutex::new(Vec::new())))
    }

    fn count(&self) -> usize {
        self.0.lock().len()
    }

    fn first(&self) -> Option<Vec<u8>> {
        self.0.lock().first().cloned()
    }
}

impl FrameSink for CollectingSink {
    fn present(&mut self, frame: &[u8]) {
        self.0.lock().push(frame.to_vec());
    }
}

fn start_server(device: MockDevice, source: Box<dyn FrameSource>) -> Server {
    Server::start("127.0.0.1:0", Box::new(device), source).unwrap()
}

/// Bind at a fixed address, retrying while the previous listener tears down
fn restart_server(addr: &str, device: MockDevice) -> Server {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match Server::start(
            addr,
            Box::new(device.clone()),
            Box::new(StaticFrameSource(Vec::new())),
        ) {
            Ok(server) => return server,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("could not rebind {}: {}", addr, e),
        }
    }
}

fn raw_connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len).unwrap();
    stream.write_all(payload).unwrap();
    stream.flush().unwrap();
}

fn recv_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut payload).unwrap();
    payload
}

fn wait_for(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

fn test_client(server_addr: &str, device: MockDevice, sink: Box<dyn FrameSink>) -> Client {
    Client::new(
        ClientOptions {
            server_addr: server_addr.to_string(),
            auto_reconnect: true,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            jitter: 0.1,
        },
        Box::new(move || Ok(Box::new(device.clone()) as Box<dyn SerialDevice>)),
        sink,
    )
}

#[test]
fn test_ping_and_serial_round_trip() {
    let device = MockDevice::new();
    let server = start_server(device.clone(), Box::new(StaticFrameSource(Vec::new())));
    let mut stream = raw_connect(&server);

    send_frame(&mut stream, b"PING");
    assert_eq!(recv_frame(&mut stream), b"PONG");

    // Writes reach the serial device through the dispatcher, unmodified
    send_frame(&mut stream, b"SEND_SERIAL:G1 X10\n");
    assert_eq!(recv_frame(&mut stream), b"OK");
    wait_for("dispatched serial write", Duration::from_secs(2), || {
        device.written() == b"G1 X10\n"
    });

    // Device output comes back on GET_SERIAL
    device.push_output(b"ok T:210\n");
    send_frame(&mut stream, b"GET_SERIAL");
    assert_eq!(recv_frame(&mut stream), b"ok T:210\n");

    // Nothing buffered yields an empty reply, not a stall
    send_frame(&mut stream, b"GET_SERIAL");
    assert!(recv_frame(&mut stream).is_empty());
}

#[test]
fn test_get_frame_returns_capture() {
    let server = start_server(
        MockDevice::new(),
        Box::new(StaticFrameSource(JPEG_STUB.to_vec())),
    );
    let mut stream = raw_connect(&server);

    // The capture loop needs a beat to publish its first frame
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        send_frame(&mut stream, b"GET_FRAME");
        let frame = recv_frame(&mut stream);
        if frame == JPEG_STUB {
            break;
        }
        assert!(frame.is_empty(), "unexpected frame payload");
        assert!(Instant::now() < deadline, "no frame within deadline");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_oversized_command_closes_session() {
    let server = start_server(MockDevice::new(), Box::new(StaticFrameSource(Vec::new())));
    let mut stream = raw_connect(&server);

    send_frame(&mut stream, b"PING");
    assert_eq!(recv_frame(&mut stream), b"PONG");
    assert_eq!(server.session_count(), 1);

    // Declare a 2 MiB command; the server rejects it before reading the body
    stream.write_all(&(2 * 1024 * 1024u32).to_be_bytes()).unwrap();
    stream.flush().unwrap();

    wait_for("session teardown", Duration::from_secs(2), || {
        server.session_count() == 0
    });
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("expected closed socket, read {} bytes", n),
    }
}

#[test]
fn test_malformed_command_closes_session() {
    let server = start_server(MockDevice::new(), Box::new(StaticFrameSource(Vec::new())));
    let mut stream = raw_connect(&server);

    send_frame(&mut stream, b"SELF_DESTRUCT");
    wait_for("session teardown", Duration::from_secs(2), || {
        server.session_count() == 0
    });
}

#[test]
fn test_silent_session_is_evicted() {
    let device = MockDevice::new();
    let server = Server::start_with(
        "127.0.0.1:0",
        Box::new(device),
        Box::new(StaticFrameSource(Vec::new())),
        ServerTuning {
            sweep_interval: Duration::from_millis(100),
            session_timeout: Duration::from_millis(300),
        },
    )
    .unwrap();
    let mut stream = raw_connect(&server);

    send_frame(&mut stream, b"PING");
    assert_eq!(recv_frame(&mut stream), b"PONG");
    assert_eq!(server.session_count(), 1);

    // Go silent and let the sweeper reclaim the session
    wait_for("stale session eviction", Duration::from_secs(3), || {
        server.session_count() == 0
    });
}

#[test]
fn test_client_bridges_serial_and_frames() {
    let server_device = MockDevice::new();
    let server = start_server(
        server_device.clone(),
        Box::new(StaticFrameSource(JPEG_STUB.to_vec())),
    );

    let client_device = MockDevice::new();
    let sink = CollectingSink::new();
    let client = test_client(
        &server.local_addr().to_string(),
        client_device.clone(),
        Box::new(sink.clone()),
    );
    client.connect().unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    // Local application traffic reaches the remote device
    client_device.push_output(b"G28\n");
    wait_for("remote device write", Duration::from_secs(3), || {
        server_device.written() == b"G28\n"
    });

    // Remote device output reaches the local application
    server_device.push_output(b"ok\n");
    wait_for("local device write", Duration::from_secs(3), || {
        client_device.written() == b"ok\n"
    });

    // Frames flow to the sink
    wait_for("first frame", Duration::from_secs(3), || sink.count() > 0);
    assert_eq!(sink.first().unwrap(), JPEG_STUB);

    // The first heartbeat has landed in the latency window by now
    wait_for("heartbeat sample", Duration::from_secs(3), || {
        client.latency().samples > 0
    });
    assert!(client.latency().latest_ms >= 0.0);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    wait_for("server-side teardown", Duration::from_secs(3), || {
        server.session_count() == 0
    });
}

#[test]
fn test_client_reconnects_after_server_restart() {
    let server_device = MockDevice::new();
    let mut server = start_server(
        server_device.clone(),
        Box::new(StaticFrameSource(Vec::new())),
    );
    let addr = server.local_addr();

    let client_device = MockDevice::new();
    let client = test_client(
        &addr.to_string(),
        client_device.clone(),
        Box::new(CollectingSink::new()),
    );
    client.connect().unwrap();
    wait_for("initial heartbeat", Duration::from_secs(3), || {
        client.latency().samples > 0
    });

    // Kill the server; the client notices and starts retrying
    server.stop();
    drop(server);
    wait_for("loss detection", Duration::from_secs(5), || {
        matches!(
            client.state(),
            ConnectionState::Reconnecting | ConnectionState::Connected
        ) && client.stats().reconnections > 0
    });

    // Bring the server back on the same address
    let restarted = restart_server(&addr.to_string(), server_device.clone());

    wait_for("reconnection", Duration::from_secs(10), || {
        client.is_connected()
    });
    assert!(client.stats().reconnections >= 1);

    // The restored link still carries traffic
    server_device.clear_written();
    client_device.push_output(b"M105\n");
    wait_for("post-reconnect write", Duration::from_secs(3), || {
        server_device.written() == b"M105\n"
    });

    client.disconnect();
    drop(restarted);
}

#[test]
fn test_client_recovers_across_repeated_restarts() {
    // Each recovered connection must leave the retry machinery re-armed:
    // a later loss has to spawn a fresh retry thread, not strand the
    // client in Reconnecting
    let server_device = MockDevice::new();
    let mut server = start_server(
        server_device.clone(),
        Box::new(StaticFrameSource(Vec::new())),
    );
    let addr = server.local_addr().to_string();

    let client_device = MockDevice::new();
    let client = test_client(&addr, client_device.clone(), Box::new(CollectingSink::new()));
    client.connect().unwrap();
    wait_for("initial heartbeat", Duration::from_secs(3), || {
        client.latency().samples > 0
    });

    for round in 1..=2u32 {
        server.stop();
        wait_for("loss detection", Duration::from_secs(5), || {
            !client.is_connected() || client.stats().reconnections >= round
        });
        server = restart_server(&addr, server_device.clone());
        wait_for("reconnection", Duration::from_secs(10), || {
            client.is_connected()
        });
        assert!(client.stats().reconnections >= round);
    }

    // The twice-restored link still carries traffic
    server_device.clear_written();
    client_device.push_output(b"M114\n");
    wait_for("post-restart write", Duration::from_secs(3), || {
        server_device.written() == b"M114\n"
    });

    client.disconnect();
}
