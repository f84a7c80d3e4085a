//! Dispatcher tests driven over real socket pairs, without the event
//! loop: build a dispatcher, hand it a parsed request and the server end
//! of a TCP pair, then read what the client end received.

use hearth::dispatcher::{BodyValue, Dispatcher, Disposition, HandlerEntry, HandlerScope};
use hearth::server::request;
use hearth::{ParamSpec, ServerConfig};
use std::io::Read;
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

fn socket_pair() -> (mio::net::TcpStream, StdTcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let client = StdTcpStream::connect(addr).expect("connect");
    let (server_side, _) = listener.accept().expect("accept");
    server_side.set_nonblocking(true).expect("nonblocking");
    (mio::net::TcpStream::from_std(server_side), client)
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(&ServerConfig::default())
}

/// Dispatch `raw` against the dispatcher, drop the server end, and
/// return everything the client saw.
fn run_request(dispatcher: &mut Dispatcher, raw: &[u8]) -> String {
    let (mut server_side, mut client) = socket_pair();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let req = request::parse(raw).expect("parse request");
    let disposition = dispatcher
        .dispatch(&mut server_side, &req)
        .expect("dispatch");
    assert!(matches!(disposition, Disposition::Close));
    drop(server_side);
    let mut out = Vec::new();
    let _ = client.read_to_end(&mut out);
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn test_closing_handler_round_trip() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "hello",
        HandlerEntry::closing(Vec::new(), |_: &mut HandlerScope| Ok("Hello".into())),
    );

    let response = run_request(&mut dispatcher, b"GET /hello HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Cache-Control: no-cache, no-store, must-revalidate\r\n"));
    assert!(response.contains("Content-Length: 5\r\n"));
    assert!(response.ends_with("Hello"));
}

#[test]
fn test_first_contact_sets_cookie() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "hello",
        HandlerEntry::closing(Vec::new(), |_: &mut HandlerScope| Ok("hi".into())),
    );

    let response = run_request(&mut dispatcher, b"GET /hello HTTP/1.1\r\n\r\n");
    assert!(response.contains("Set-Cookie: "));
    assert_eq!(dispatcher.sessions.len(), 1);
}

#[test]
fn test_valid_cookie_suppresses_set_cookie() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "hello",
        HandlerEntry::closing(Vec::new(), |_: &mut HandlerScope| Ok("hi".into())),
    );
    let token = dispatcher.sessions.new_session().expect("session");

    let raw = format!("GET /hello HTTP/1.1\r\nCookie: {token}\r\n\r\n");
    let response = run_request(&mut dispatcher, raw.as_bytes());
    assert!(!response.contains("Set-Cookie: "));
    assert_eq!(dispatcher.sessions.len(), 1);
}

#[test]
fn test_unknown_uri_gets_404() {
    let mut dispatcher = dispatcher();
    let response = run_request(&mut dispatcher, b"GET /ghost HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn test_failing_body_gets_500() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "bad",
        HandlerEntry::closing(Vec::new(), |_: &mut HandlerScope| {
            anyhow::bail!("nope")
        }),
    );
    let response = run_request(&mut dispatcher, b"GET /bad HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
}

#[test]
fn test_parameter_rejection_gets_400() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "count",
        HandlerEntry::closing(
            vec![ParamSpec::typed("n", "integer")],
            |scope: &mut HandlerScope| Ok(scope.params.integer("n").unwrap_or(0).into()),
        ),
    );
    let response = run_request(&mut dispatcher, b"GET /count?n=word HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_json_handler_encodes_value() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "report",
        HandlerEntry::json(Vec::new(), |_: &mut HandlerScope| {
            Ok(BodyValue::Json(serde_json::json!({ "n": 3 })))
        }),
    );
    let response = run_request(&mut dispatcher, b"GET /report HTTP/1.1\r\n\r\n");
    assert!(response.contains("Content-Type: application/json; charset=utf-8\r\n"));
    assert!(response.ends_with("{\"n\":3}"));
}

#[test]
fn test_redirect_closes_with_location() {
    let mut dispatcher = dispatcher();
    dispatcher
        .handlers
        .register("away", HandlerEntry::redirect("/there", false));
    let response = run_request(&mut dispatcher, b"GET /away HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
    assert!(response.contains("Location: /there\r\n"));
}

#[test]
fn test_stream_handler_retains_with_subscriptions() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "events",
        HandlerEntry::stream(Vec::new(), |scope: &mut HandlerScope| {
            scope.subscribe("alpha");
            scope.subscribe("beta");
            Ok(BodyValue::None)
        }),
    );

    let (mut server_side, mut client) = socket_pair();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let req = request::parse(b"GET /events HTTP/1.1\r\n\r\n").expect("parse");
    let disposition = dispatcher.dispatch(&mut server_side, &req).expect("dispatch");
    let Disposition::Retain(channels) = disposition else {
        panic!("stream handler must retain its socket");
    };
    assert_eq!(channels, vec!["alpha".to_string(), "beta".to_string()]);

    let mut opening = [0u8; 4096];
    let n = client.read(&mut opening).expect("read opening");
    let opening = String::from_utf8_lossy(&opening[..n]).into_owned();
    assert!(opening.contains("Content-Type: text/event-stream; charset=utf-8\r\n"));
    assert!(opening.contains("Connection: keep-alive\r\n"));
    assert!(opening.contains("Expires: Thu, 01 Jan 1970 00:00:01 GMT\r\n"));
    assert!(opening.ends_with("data: Listening...\n\n"));
}

#[test]
fn test_stream_initial_frame_uses_body_value() {
    let mut dispatcher = dispatcher();
    dispatcher.handlers.register(
        "ticker",
        HandlerEntry::stream(Vec::new(), |scope: &mut HandlerScope| {
            scope.subscribe("ticks");
            Ok("ready".into())
        }),
    );

    let (mut server_side, mut client) = socket_pair();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let req = request::parse(b"GET /ticker HTTP/1.1\r\n\r\n").expect("parse");
    dispatcher.dispatch(&mut server_side, &req).expect("dispatch");

    let mut opening = [0u8; 4096];
    let n = client.read(&mut opening).expect("read opening");
    assert!(String::from_utf8_lossy(&opening[..n]).ends_with("data: ready\n\n"));
}
