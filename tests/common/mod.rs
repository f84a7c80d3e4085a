#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use hearth::{Server, ServerConfig};

/// Pick a port the OS considers free right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind probe listener")
        .local_addr()
        .expect("probe addr")
        .port()
}

/// Spin up a configured server on its own thread and wait until it
/// accepts connections.
pub fn start_server(
    config: ServerConfig,
    configure: impl FnOnce(&mut Server) + Send + 'static,
) -> SocketAddr {
    let addr = SocketAddr::from(([127, 0, 0, 1], free_port()));
    thread::spawn(move || {
        let mut server = Server::new(config).expect("server config");
        configure(&mut server);
        let _ = server.start(addr);
    });
    wait_ready(addr);
    addr
}

pub fn wait_ready(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server at {addr} never became ready");
}

/// Send raw bytes, then collect the full response until the server
/// closes the socket.
pub fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream.write_all(raw).expect("send request");
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    String::from_utf8_lossy(&response).into_owned()
}

pub fn http_get(addr: SocketAddr, path: &str) -> String {
    exchange(addr, format!("GET {path} HTTP/1.1\r\n\r\n").as_bytes())
}

pub fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

/// Read from an open stream until `pattern` shows up or the deadline
/// passes.
pub fn read_until(stream: &mut TcpStream, pattern: &str, deadline: Duration) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .expect("read timeout");
    let start = Instant::now();
    let mut collected = Vec::new();
    let mut chunk = [0u8; 1024];
    while start.elapsed() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                if String::from_utf8_lossy(&collected).contains(pattern) {
                    break;
                }
            }
            Err(_) => {}
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
