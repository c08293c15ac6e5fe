//! Minimal HTTP responder
//!
//! `startMongoose` binds a listener and parks each incoming request until a
//! script answers it:
//!
//! ```text
//! var port = ESP32.getNativeFunction("startMongoose")(8080);
//! var respond = ESP32.getNativeFunction("serverResponseMongoose");
//! var req = MONGOOSE.nextRequest();   // { id, method, path, body } or null
//! if (req) respond(req.id, 200, "hello");
//! ```
//!
//! Each accepted connection gets its own reader thread, which parses the
//! request and queues it; the script thread only ever polls the queue and
//! writes responses.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::TAG;
use crate::engine::{Arity, Context, EngineResult, Return, Value};
use crate::net;
use crate::runtime::put_function;

/// Port used when `startMongoose` gets no usable port.
pub const DEFAULT_PORT: u16 = 80;

/// Requests waiting for the script before readers block.
const QUEUE_DEPTH: usize = 64;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest request line plus headers.
const MAX_HEAD: u64 = 8 * 1024;

/// Largest request body that is read.
const MAX_BODY: usize = 1024 * 1024;

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// A parsed request awaiting a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Where servers listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSettings {
    pub bind_host: String,
    pub default_port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            default_port: DEFAULT_PORT,
        }
    }
}

struct Server {
    port: u16,
    wake: SocketAddr,
    accept: Option<JoinHandle<()>>,
}

/// State handed to every accept and reader thread.
#[derive(Clone)]
struct Shared {
    tx: Sender<Request>,
    connections: Connections,
    next_id: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

/// Shared state between the script thread and the server threads.
///
/// Dropping the hub stops every accept loop, releases the listening ports
/// and closes connections still waiting for a response.
pub struct WebHub {
    settings: WebSettings,
    shared: Shared,
    requests_rx: Receiver<Request>,
    servers: Vec<Server>,
}

impl WebHub {
    pub fn new(settings: WebSettings) -> Self {
        let (tx, requests_rx) = bounded(QUEUE_DEPTH);
        Self {
            settings,
            shared: Shared {
                tx,
                connections: Arc::new(Mutex::new(HashMap::new())),
                next_id: Arc::new(AtomicU64::new(1)),
                stop: Arc::new(AtomicBool::new(false)),
            },
            requests_rx,
            servers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &WebSettings {
        &self.settings
    }

    /// Ports of the servers started so far.
    pub fn ports(&self) -> Vec<u16> {
        self.servers.iter().map(|s| s.port).collect()
    }

    /// Bind `port` (0 picks a free one) and start accepting. Returns the
    /// bound port.
    pub fn start(&mut self, port: u16) -> io::Result<u16> {
        let addr = net::resolve(&format!("{}:{}", self.settings.bind_host, port))?;
        let listener = net::bind_listener(addr)?;
        let local = listener.local_addr()?;

        let shared = self.shared.clone();
        let accept = thread::Builder::new()
            .name(format!("web-{}", local.port()))
            .spawn(move || accept_loop(listener, shared))?;

        self.servers.push(Server {
            port: local.port(),
            wake: wake_addr(local),
            accept: Some(accept),
        });
        info!(target: TAG, "web server listening on port {}", local.port());
        Ok(local.port())
    }

    pub fn try_next(&self) -> Option<Request> {
        self.requests_rx.try_recv().ok()
    }

    /// Block until a request arrives or `timeout` passes.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Request> {
        self.requests_rx.recv_timeout(timeout).ok()
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Answer and close a parked request. Returns false for an unknown id
    /// or a failed write.
    pub fn respond(&self, id: u64, status: u16, body: &[u8]) -> bool {
        let Some(mut stream) = self.shared.connections.lock().remove(&id) else {
            debug!(target: TAG, "no pending request {}", id);
            return false;
        };
        match write_response(&mut stream, status, body) {
            Ok(()) => true,
            Err(e) => {
                debug!(target: TAG, "response to request {} failed: {}", id, e);
                false
            }
        }
    }
}

impl Default for WebHub {
    fn default() -> Self {
        Self::new(WebSettings::default())
    }
}

impl Drop for WebHub {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        for server in &mut self.servers {
            // A blocked accept() only returns once something connects
            match TcpStream::connect_timeout(&server.wake, WAKE_TIMEOUT) {
                Ok(_) => {
                    if let Some(accept) = server.accept.take() {
                        let _ = accept.join();
                    }
                }
                Err(e) => {
                    warn!(target: TAG, "cannot stop web server on port {}: {}", server.port, e)
                }
            }
        }
        let parked = std::mem::take(&mut *self.shared.connections.lock());
        if !parked.is_empty() {
            debug!(target: TAG, "closing {} unanswered requests", parked.len());
        }
    }
}

/// Address a local client uses to reach a listener bound to `local`.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

fn accept_loop(listener: TcpListener, shared: Shared) {
    for stream in listener.incoming() {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target: TAG, "accept failed: {}", e);
                continue;
            }
        };
        let reader = shared.clone();
        if let Err(e) = thread::Builder::new()
            .name("web-conn".to_string())
            .spawn(move || serve_connection(stream, reader))
        {
            warn!(target: TAG, "cannot spawn connection reader: {}", e);
        }
    }
    debug!(target: TAG, "accept loop stopped");
}

/// Read one request and park its connection for the script.
fn serve_connection(stream: TcpStream, shared: Shared) {
    let Some((method, path, body, stream)) = read_request(stream) else {
        return;
    };
    if shared.stop.load(Ordering::SeqCst) {
        return;
    }
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    shared.connections.lock().insert(id, stream);
    let request = Request {
        id,
        method,
        path,
        body,
    };
    debug!(target: TAG, "request {}: {} {}", id, request.method, request.path);
    if shared.tx.send(request).is_err() {
        // The hub is gone
        shared.connections.lock().remove(&id);
    }
}

/// Parse the request line, headers and `Content-Length` body. Malformed
/// requests are answered with 400 and dropped.
fn read_request(mut stream: TcpStream) -> Option<(String, String, Vec<u8>, TcpStream)> {
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        debug!(target: TAG, "cannot set read timeout: {}", e);
        return None;
    }
    let parsed = {
        let mut reader = BufReader::new(&stream);
        parse_request(&mut reader)
    };
    match parsed {
        Ok((method, path, body)) => Some((method, path, body, stream)),
        Err(e) => {
            debug!(target: TAG, "bad request: {}", e);
            let _ = write_response(&mut stream, 400, b"Bad Request");
            None
        }
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Read one CRLF-terminated line of the request head. `None` at end of
/// stream.
fn read_head_line(head: &mut io::Take<impl BufRead>) -> io::Result<Option<String>> {
    let mut line = String::new();
    if head.read_line(&mut line)? == 0 {
        return if head.limit() == 0 {
            Err(invalid("request head too large"))
        } else {
            Ok(None)
        };
    }
    if !line.ends_with('\n') && head.limit() == 0 {
        return Err(invalid("request head too large"));
    }
    Ok(Some(line))
}

fn parse_request(reader: &mut impl BufRead) -> io::Result<(String, String, Vec<u8>)> {
    let mut head = reader.by_ref().take(MAX_HEAD);

    let request_line = read_head_line(&mut head)?.unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(invalid("invalid request line"));
    };

    let mut content_length = 0usize;
    while let Some(header) = read_head_line(&mut head)? {
        let header = header.trim();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    if content_length > MAX_BODY {
        return Err(invalid(format!("body of {} bytes is too large", content_length)));
    }

    let reader = head.into_inner();
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    Ok((method.to_string(), path.to_string(), body))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn write_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        reason_phrase(status),
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

/// Install `MONGOOSE.nextRequest`.
pub fn install(ctx: &mut Context) -> EngineResult<()> {
    ctx.push_global_object()?;
    ctx.push_object()?;
    put_function(ctx, "nextRequest", next_request, Arity::Fixed(0))?;
    ctx.put_prop_string(-2, "MONGOOSE")?;
    ctx.pop()?;
    Ok(())
}

fn as_port(value: &Value) -> Option<u16> {
    let n = value.as_number()?;
    (n.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&n)).then_some(n as u16)
}

/// `startMongoose(options)`: `options` is a port number or `{ port }`.
pub fn start_mongoose(ctx: &mut Context) -> EngineResult<Return> {
    let options = ctx.get_value(0).unwrap_or_default();
    let requested = match &options {
        Value::Object(_) => as_port(&ctx.get_property(&options, "port")?),
        other => as_port(other),
    };
    let hub = ctx.host_data_or_default::<WebHub>();
    let port = requested.unwrap_or(hub.settings().default_port);
    match hub.start(port) {
        Ok(bound) => {
            ctx.push_number(f64::from(bound))?;
            Ok(Return::Value)
        }
        Err(e) => {
            warn!(target: TAG, "cannot start web server on port {}: {}", port, e);
            Ok(Return::Void)
        }
    }
}

/// `serverResponseMongoose(connId, status, body)`
pub fn server_response_mongoose(ctx: &mut Context) -> EngineResult<Return> {
    let id = ctx
        .get_number(0)
        .filter(|n| n.fract() == 0.0 && *n >= 1.0)
        .map(|n| n as u64);
    let status = ctx
        .get_number(1)
        .filter(|n| n.fract() == 0.0 && (100.0..=999.0).contains(n))
        .map(|n| n as u16);

    let written = match (id, status) {
        (Some(id), Some(status)) => {
            if !ctx.is_string(2) {
                ctx.to_string(2)?;
            }
            let body = ctx.get_lstring(2).map(<[u8]>::to_vec).unwrap_or_default();
            ctx.host_data::<WebHub>()
                .map(|hub| hub.respond(id, status, &body))
                .unwrap_or(false)
        }
        _ => {
            debug!(target: TAG, "serverResponseMongoose: bad connection id or status");
            false
        }
    };
    ctx.push_boolean(written)?;
    Ok(Return::Value)
}

/// `MONGOOSE.nextRequest()`
fn next_request(ctx: &mut Context) -> EngineResult<Return> {
    let Some(request) = ctx.host_data::<WebHub>().and_then(WebHub::try_next) else {
        ctx.push_null()?;
        return Ok(Return::Value);
    };
    ctx.push_object()?;
    ctx.push_number(request.id as f64)?;
    ctx.put_prop_string(-2, "id")?;
    ctx.push_string(&request.method)?;
    ctx.put_prop_string(-2, "method")?;
    ctx.push_string(&request.path)?;
    ctx.put_prop_string(-2, "path")?;
    ctx.push_lstring(&request.body)?;
    ctx.put_prop_string(-2, "body")?;
    Ok(Return::Value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_request_with_body() {
        let raw = b"POST /value HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let (method, path, body) = parse_request(&mut Cursor::new(&raw[..])).unwrap();
        assert_eq!(method, "POST");
        assert_eq!(path, "/value");
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_parse_request_header_case() {
        let raw = b"PUT / HTTP/1.1\r\ncontent-LENGTH:  2\r\n\r\nok";
        let (_, _, body) = parse_request(&mut Cursor::new(&raw[..])).unwrap();
        assert_eq!(body, b"ok");
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        assert!(parse_request(&mut Cursor::new(&b"\r\n"[..])).is_err());
        assert!(parse_request(&mut Cursor::new(&b"GET\r\n\r\n"[..])).is_err());
        let short = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(parse_request(&mut Cursor::new(&short[..])).is_err());
    }

    #[test]
    fn test_parse_request_caps_head() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD as usize));
        raw.extend_from_slice(b"\r\n\r\n");
        let err = parse_request(&mut Cursor::new(raw)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let endless = vec![b'G'; 4 * MAX_HEAD as usize];
        assert!(parse_request(&mut Cursor::new(endless)).is_err());
    }

    #[test]
    fn test_parse_request_head_then_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcEXTRA";
        let mut cursor = Cursor::new(&raw[..]);
        let (_, _, body) = parse_request(&mut cursor).unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_drop_releases_port() {
        let settings = WebSettings {
            bind_host: "127.0.0.1".to_string(),
            default_port: 0,
        };
        let mut hub = WebHub::new(settings.clone());
        let port = hub.start(0).unwrap();
        assert_eq!(hub.ports(), [port]);
        drop(hub);

        let mut again = WebHub::new(settings);
        assert_eq!(again.start(port).unwrap(), port);
    }

    #[test]
    fn test_wake_addr_for_wildcard() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(wake_addr(any), "127.0.0.1:8080".parse().unwrap());
        let local: SocketAddr = "127.0.0.1:81".parse().unwrap();
        assert_eq!(wake_addr(local), local);
    }

    #[test]
    fn test_as_port() {
        assert_eq!(as_port(&Value::from(8080.0)), Some(8080));
        assert_eq!(as_port(&Value::from(0.0)), Some(0));
        assert_eq!(as_port(&Value::from(65536.0)), None);
        assert_eq!(as_port(&Value::from(80.5)), None);
        assert_eq!(as_port(&Value::from(-1.0)), None);
        assert_eq!(as_port(&Value::from("80")), None);
        assert_eq!(as_port(&Value::Undefined), None);
    }

    #[test]
    fn test_respond_unknown_id() {
        let hub = WebHub::default();
        assert!(!hub.respond(42, 200, b"nobody"));
        assert_eq!(hub.pending(), 0);
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(299), "");
    }
}
