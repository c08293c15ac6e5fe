//! Web responder tests
//!
//! Starts a server through the `startMongoose` capability, sends real HTTP
//! requests from a client thread and answers them through
//! `serverResponseMongoose`.

use espbridge::{Bridge, BridgeConfig, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

fn boot() -> Bridge {
    let mut config = BridgeConfig::default();
    config.web.bind_host = "127.0.0.1".to_string();
    Bridge::boot(&config).unwrap()
}

fn capability(bridge: &mut Bridge, id: &str) -> Value {
    let f = bridge
        .call("ESP32.getNativeFunction", &[Value::from(id)])
        .unwrap();
    assert!(bridge.context().is_function(&f), "{} missing", id);
    f
}

fn start_server(bridge: &mut Bridge) -> u16 {
    let start = capability(bridge, "startMongoose");
    let port = bridge
        .context_mut()
        .call_value(&start, &[Value::from(0.0)])
        .unwrap();
    port.as_number().expect("bound port") as u16
}

fn wait_for_request(bridge: &mut Bridge) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let request = bridge.call("MONGOOSE.nextRequest", &[]).unwrap();
        if !request.is_null() || Instant::now() > deadline {
            return request;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn send(port: u16, raw: &'static [u8]) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(raw).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    })
}

#[test]
fn test_request_round_trip() {
    let mut bridge = boot();
    let port = start_server(&mut bridge);
    assert_ne!(port, 0);

    let client = send(
        port,
        b"POST /value HTTP/1.1\r\nHost: esp32\r\nContent-Length: 11\r\n\r\nhello world",
    );

    let request = wait_for_request(&mut bridge);
    assert!(!request.is_null(), "no request arrived");
    let ctx = bridge.context();
    let field = |name: &str| ctx.get_property(&request, name).unwrap();
    let id = field("id");
    assert_eq!(field("method").as_js_string().unwrap().as_str(), Some("POST"));
    assert_eq!(field("path").as_js_string().unwrap().as_str(), Some("/value"));
    assert_eq!(field("body").as_js_string().unwrap().as_bytes(), b"hello world");

    let respond = capability(&mut bridge, "serverResponseMongoose");
    let written = bridge
        .context_mut()
        .call_value(&respond, &[id.clone(), Value::from(200.0), Value::from("stored")])
        .unwrap();
    assert_eq!(written.as_bool(), Some(true));

    let response = client.join().unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.contains("Content-Length: 6\r\n"));
    assert!(response.ends_with("\r\n\r\nstored"));

    // The connection is closed; answering twice fails
    let again = bridge
        .context_mut()
        .call_value(&respond, &[id, Value::from(200.0), Value::from("x")])
        .unwrap();
    assert_eq!(again.as_bool(), Some(false));
}

#[test]
fn test_non_string_body_is_converted() {
    let mut bridge = boot();
    let port = start_server(&mut bridge);
    let client = send(port, b"GET /count HTTP/1.1\r\n\r\n");

    let request = wait_for_request(&mut bridge);
    let id = bridge.context().get_property(&request, "id").unwrap();
    let respond = capability(&mut bridge, "serverResponseMongoose");
    let written = bridge
        .context_mut()
        .call_value(&respond, &[id, Value::from(404.0), Value::from(42.0)])
        .unwrap();
    assert_eq!(written.as_bool(), Some(true));

    let response = client.join().unwrap();
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.ends_with("42"));
}

#[test]
fn test_options_object_and_bad_arguments() {
    let mut bridge = boot();
    let start = capability(&mut bridge, "startMongoose");

    let options = {
        let ctx = bridge.context_mut();
        ctx.push_object().unwrap();
        ctx.push_number(0.0).unwrap();
        ctx.put_prop_string(-2, "port").unwrap();
        ctx.pop().unwrap()
    };
    let port = bridge
        .context_mut()
        .call_value(&start, &[options])
        .unwrap();
    assert!(port.as_number().unwrap() > 0.0);

    let respond = capability(&mut bridge, "serverResponseMongoose");
    for args in [
        [Value::from(999_999.0), Value::from(200.0), Value::from("x")],
        [Value::from("1"), Value::from(200.0), Value::from("x")],
        [Value::from(1.0), Value::from(20.0), Value::from("x")],
        [Value::from(1.5), Value::from(200.0), Value::from("x")],
    ] {
        let written = bridge.context_mut().call_value(&respond, &args).unwrap();
        assert_eq!(written.as_bool(), Some(false));
    }
    assert_eq!(bridge.context().get_top(), 0);
}

#[test]
fn test_next_request_empty_queue() {
    let mut bridge = boot();
    assert!(bridge.call("MONGOOSE.nextRequest", &[]).unwrap().is_null());
}

#[test]
fn test_idle_client_does_not_block_others() {
    let mut bridge = boot();
    let port = start_server(&mut bridge);

    // Connects and never sends anything
    let idle = TcpStream::connect(("127.0.0.1", port)).unwrap();
    thread::sleep(Duration::from_millis(50));
    let client = send(port, b"GET /x HTTP/1.1\r\n\r\n");

    let deadline = Instant::now() + Duration::from_secs(2);
    let request = loop {
        let request = bridge.call("MONGOOSE.nextRequest", &[]).unwrap();
        if !request.is_null() || Instant::now() > deadline {
            break request;
        }
        thread::sleep(Duration::from_millis(5));
    };
    assert!(!request.is_null(), "request stuck behind an idle client");
    let path = bridge.context().get_property(&request, "path").unwrap();
    assert_eq!(path.as_js_string().unwrap().as_str(), Some("/x"));

    let id = bridge.context().get_property(&request, "id").unwrap();
    let respond = capability(&mut bridge, "serverResponseMongoose");
    bridge
        .context_mut()
        .call_value(&respond, &[id, Value::from(200.0), Value::from("ok")])
        .unwrap();
    assert!(client.join().unwrap().ends_with("ok"));
    drop(idle);
}

#[test]
fn test_port_released_after_bridge_drop() {
    let mut bridge = boot();
    let port = start_server(&mut bridge);

    // Leave one request unanswered
    let client = send(port, b"GET /pending HTTP/1.1\r\n\r\n");
    assert!(!wait_for_request(&mut bridge).is_null());
    drop(bridge);

    // The parked connection is closed without a response
    assert_eq!(client.join().unwrap(), "");

    let mut rebooted = boot();
    let start = capability(&mut rebooted, "startMongoose");
    let result = rebooted
        .context_mut()
        .call_value(&start, &[Value::from(f64::from(port))])
        .unwrap();
    assert_eq!(result.as_number(), Some(f64::from(port)));
}

#[test]
fn test_port_in_use_is_undefined() {
    let mut bridge = boot();
    let port = start_server(&mut bridge);

    let start = capability(&mut bridge, "startMongoose");
    let result = bridge
        .context_mut()
        .call_value(&start, &[Value::from(f64::from(port))])
        .unwrap();
    assert!(result.is_undefined());
}
