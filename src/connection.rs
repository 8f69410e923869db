// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-connection protocol state machine: detects HTTP/1.1 vs HTTP/2 on a
//! freshly accepted socket, buffers bytes until full requests are available,
//! and drives each one through the middleware chain, router, and upstream
//! dispatch to produce the bytes written back to the peer.
//!
//! [`PlainSession`] and [`TlsSession`] both own an [`Engine`], which holds
//! everything transport-agnostic. The two session types differ only in how
//! bytes reach and leave that engine: plaintext sockets read/write directly,
//! TLS sessions go through `rustls`.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use mio::{event::Source, Interest, Registry, Token};
use rustls::{ServerConfig, ServerConnection};
use tracing::warn;

use crate::buffer::VectoredBuffer;
use crate::context::ConnectionContext;
use crate::discriminator::{self, Protocol as WireProtocol};
use crate::error::Brief;
use crate::http1::{self, Request as H1Request};
use crate::http2::{FrameError, H2Connection, RequestEvent};
use crate::middleware::Outcome;
use crate::net::tcp_stream::TcpStream;
use crate::parser::{Method, Status, Version};
use crate::websocket::handshake;

/// Drives one accepted connection's lifecycle. Implemented by
/// [`PlainSession`] and [`TlsSession`]; the listener holds a
/// `Slab<Box<dyn Connection>>` and dispatches mio readiness events into it.
pub trait Connection: Send {
    /// Services a readiness event, reading and/or writing as indicated and
    /// running every complete request that becomes available through to a
    /// response.
    fn ready(&mut self, readable: bool, writable: bool, ctx: &ConnectionContext) -> io::Result<()>;
    /// `true` once the connection has nothing left to read or write and
    /// should be removed from the listener's table.
    fn is_closed(&self) -> bool;
    /// This connection's slab token.
    fn token(&self) -> Token;
    /// Registers the underlying socket with `registry`.
    fn register(&mut self, registry: &Registry) -> io::Result<()>;
    /// Re-registers interest, e.g. after queuing a response to write.
    fn reregister(&mut self, registry: &Registry) -> io::Result<()>;
    /// Deregisters the underlying socket ahead of removal from the slab.
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;
}

/// Transport-agnostic request pipeline: buffers bytes, detects the protocol,
/// and turns complete requests into response bytes.
enum Engine {
    Detecting(Vec<u8>),
    Http1(Vec<u8>),
    Http2 { conn: Box<H2Connection>, pending: Vec<u8> },
}

impl Engine {
    fn new() -> Self {
        Engine::Detecting(Vec::new())
    }

    /// Feeds newly read bytes through the pipeline, appending any bytes that
    /// must be written back to the peer into `out`. Returns `true` if the
    /// connection should close once `out` has been flushed.
    fn feed(&mut self, data: &[u8], ctx: &ConnectionContext, out: &mut Vec<u8>) -> bool {
        if let Engine::Detecting(buf) = self {
            buf.extend_from_slice(data);
            let snapshot = buf.clone();
            let protocol = discriminator::classify(|b: &mut [u8]| {
                let n = snapshot.len().min(b.len());
                b[..n].copy_from_slice(&snapshot[..n]);
                Ok(n)
            })
            .unwrap_or(WireProtocol::Unknown);

            match protocol {
                WireProtocol::Unknown => return false,
                WireProtocol::Http1 => {
                    let carried = std::mem::take(buf);
                    *self = Engine::Http1(carried);
                }
                WireProtocol::Http2 => {
                    let mut carried = std::mem::take(buf);
                    let preface_len = crate::http2::CLIENT_PREFACE.len().min(carried.len());
                    carried.drain(..preface_len);
                    let mut conn = Box::new(H2Connection::default());
                    out.extend_from_slice(&conn.initial_frames());
                    *self = Engine::Http2 { conn, pending: carried };
                }
            }
            return self.feed(&[], ctx, out);
        }

        match self {
            Engine::Detecting(_) => unreachable!("transitioned above"),
            Engine::Http1(buf) => {
                buf.extend_from_slice(data);
                loop {
                    match http1::request::try_parse(buf) {
                        Ok(Some((request, consumed))) => {
                            buf.drain(..consumed);
                            let close = !keeps_alive(&request);
                            out.extend_from_slice(&handle_http1(&request, ctx));
                            if close {
                                return true;
                            }
                        }
                        Ok(None) => return false,
                        Err(_) => {
                            out.extend_from_slice(&write_response(
                                http1::Response::new(Version::H1_1, Status::BadRequest)
                                    .body(b"malformed request".to_vec()),
                            ));
                            return true;
                        }
                    }
                }
            }
            Engine::Http2 { conn, pending } => {
                pending.extend_from_slice(data);
                let input = std::mem::take(pending);
                match conn.receive(&input) {
                    Ok((consumed, outbound, events)) => {
                        *pending = input[consumed..].to_vec();
                        out.extend_from_slice(&outbound);
                        for event in &events {
                            out.extend_from_slice(&handle_http2(conn, event, ctx));
                        }
                        false
                    }
                    Err(e) => {
                        out.extend_from_slice(&conn.goaway(0, e));
                        true
                    }
                }
            }
        }
    }
}

/// RFC 9112 Section 9.3: HTTP/1.1 defaults to persistent, HTTP/1.0 defaults
/// to not, and an explicit `Connection` token overrides either default.
fn keeps_alive(request: &H1Request) -> bool {
    match request.header("connection").map(str::to_ascii_lowercase).as_deref() {
        Some("close") => false,
        Some("keep-alive") => true,
        _ => !matches!(request.version, Version::H1_0),
    }
}

fn status_for_code(code: u16) -> Status {
    match code {
        400 => Status::BadRequest,
        401 => Status::Unauthorized,
        403 => Status::Forbidden,
        404 => Status::NotFound,
        429 => Status::TooManyRequests,
        502 => Status::BadGateway,
        503 => Status::ServiceUnavailable,
        _ => Status::InternalServerError,
    }
}

/// Serializes `response` as head and body segments through a
/// [`VectoredBuffer`] so the two are handed to the stream in a single
/// scatter/gather write rather than one copy-and-concatenate pass.
fn write_response(response: http1::Response) -> Vec<u8> {
    let (head, body) = response.into_parts();
    let mut vectored = VectoredBuffer::new();
    vectored.append_move(head);
    vectored.append_move(body);

    let mut bytes = Vec::new();
    // A `Vec<u8>` `Write` impl never fails.
    vectored.write_to(&mut bytes).expect("writing to a Vec cannot fail");
    bytes
}

fn handle_http1(request: &H1Request, ctx: &ConnectionContext) -> Vec<u8> {
    let start = std::time::Instant::now();
    let path = request.target.split('?').next().unwrap_or(&request.target);

    if let Outcome::Reject { status, message } = ctx.middleware.run(request, ctx.peer_addr.ip()) {
        ctx.metrics.middleware_rejected("chain");
        ctx.metrics.request_completed(status, start.elapsed());
        return write_response(
            http1::Response::new(request.version, status_for_code(status)).body(message.into_bytes()),
        );
    }

    if discriminator::is_websocket_upgrade(request.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))) {
        return match handshake::is_valid_handshake(request.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))) {
            Some(key) => {
                ctx.metrics.request_completed(101, start.elapsed());
                write_response(
                    http1::Response::new(Version::H1_1, Status::SwitchingProtocols)
                        .header("Upgrade", "websocket")
                        .header("Connection", "Upgrade")
                        .header("Sec-WebSocket-Accept", handshake::accept_key(key)),
                )
            }
            None => {
                ctx.metrics.request_completed(400, start.elapsed());
                write_response(
                    http1::Response::new(request.version, Status::BadRequest)
                        .body(b"invalid websocket handshake".to_vec()),
                )
            }
        };
    }

    let Some(route_match) = ctx.router.route(request.method, path) else {
        ctx.metrics.request_completed(404, start.elapsed());
        return write_response(
            http1::Response::new(request.version, Status::NotFound).body(b"not found".to_vec()),
        );
    };

    match ctx.upstream.forward(&route_match.route.handler, request) {
        Ok(bytes) => {
            ctx.metrics.request_completed(200, start.elapsed());
            bytes
        }
        Err(err) => {
            warn!(upstream = %route_match.route.handler, error = %Brief(&err), "upstream request failed");
            ctx.metrics.upstream_failure(&route_match.route.handler);
            ctx.metrics.request_completed(502, start.elapsed());
            write_response(
                http1::Response::new(request.version, Status::BadGateway).body(b"upstream error".to_vec()),
            )
        }
    }
}

/// RFC 9113 Section 8.3: `:method` and `:path` are required pseudo-headers;
/// a HEADERS block missing either, or carrying an unrecognized method, is a
/// stream error of type `PROTOCOL_ERROR` — that stream resets, the
/// connection and its other streams continue.
fn handle_http2(conn: &mut H2Connection, event: &RequestEvent, ctx: &ConnectionContext) -> Vec<u8> {
    let start = std::time::Instant::now();

    let method = event
        .headers
        .iter()
        .find(|(name, _)| name == ":method")
        .and_then(|(_, value)| Method::from_bytes(value.as_bytes()));
    let path = event
        .headers
        .iter()
        .find(|(name, _)| name == ":path")
        .map(|(_, value)| value.clone());

    let (Some(method), Some(path)) = (method, path) else {
        ctx.metrics.request_completed(400, start.elapsed());
        return conn.rst_stream(event.stream_id, FrameError::MissingPseudoHeader);
    };

    let headers: Vec<(String, String)> = event
        .headers
        .iter()
        .filter(|(name, _)| !name.starts_with(':'))
        .cloned()
        .collect();

    let request = H1Request {
        method,
        target: path.clone(),
        version: Version::H2,
        headers,
        body: event.body.clone(),
    };

    if let Outcome::Reject { status, message } = ctx.middleware.run(&request, ctx.peer_addr.ip()) {
        ctx.metrics.middleware_rejected("chain");
        ctx.metrics.request_completed(status, start.elapsed());
        return conn.encode_response(
            event.stream_id,
            &[(":status".to_string(), status.to_string())],
            message.as_bytes(),
        );
    }

    let Some(route_match) = ctx.router.route(method, &path) else {
        ctx.metrics.request_completed(404, start.elapsed());
        return conn.encode_response(event.stream_id, &[(":status".to_string(), "404".to_string())], b"not found");
    };

    match ctx.upstream.forward(&route_match.route.handler, &request) {
        Ok(bytes) => {
            ctx.metrics.request_completed(200, start.elapsed());
            conn.encode_response(event.stream_id, &[(":status".to_string(), "200".to_string())], &bytes)
        }
        Err(err) => {
            warn!(upstream = %route_match.route.handler, error = %Brief(&err), "upstream request failed");
            ctx.metrics.upstream_failure(&route_match.route.handler);
            ctx.metrics.request_completed(502, start.elapsed());
            conn.encode_response(event.stream_id, &[(":status".to_string(), "502".to_string())], b"upstream error")
        }
    }
}

/// Builds a session from a freshly accepted socket, plaintext or TLS.
pub struct ConnectionBuilder<S> {
    stream: S,
    token: Token,
}

impl<S> ConnectionBuilder<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Wraps an accepted stream pending a choice of transport.
    pub fn new(stream: S, token: Token) -> Self {
        ConnectionBuilder { stream, token }
    }

    /// Builds a plaintext session.
    pub fn with_plaintext(self) -> PlainSession<S> {
        PlainSession::new(self.token, self.stream)
    }

    /// Builds a TLS session from `config`, failing only if `rustls` rejects
    /// the configuration itself.
    pub fn with_tls(self, config: Arc<ServerConfig>) -> Result<TlsSession<S>, rustls::Error> {
        let tls = ServerConnection::new(config)?;
        Ok(TlsSession::new(self.token, self.stream, tls))
    }
}

/// A connection terminated in plaintext.
pub struct PlainSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    stream: S,
    token: Token,
    engine: Engine,
    pending_write: Vec<u8>,
    closed: bool,
}

impl<S> PlainSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Wraps `stream`, registered under `token`.
    pub fn new(token: Token, stream: S) -> Self {
        PlainSession {
            stream,
            token,
            engine: Engine::new(),
            pending_write: Vec::new(),
            closed: false,
        }
    }

    fn interest(&self) -> Interest {
        if self.pending_write.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}

impl<S> Connection for PlainSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    fn ready(&mut self, readable: bool, writable: bool, ctx: &ConnectionContext) -> io::Result<()> {
        if readable {
            let mut buf = [0u8; 8192];
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => {
                        self.closed = true;
                        break;
                    }
                    Ok(n) => {
                        if self.engine.feed(&buf[..n], ctx, &mut self.pending_write) {
                            self.closed = true;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        if writable && !self.pending_write.is_empty() {
            match self.stream.write(&self.pending_write) {
                Ok(n) => {
                    self.pending_write.drain(..n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed && self.pending_write.is_empty()
    }

    fn token(&self) -> Token {
        self.token
    }

    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.interest();
        registry.register(&mut self.stream, self.token, interest)
    }

    fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.interest();
        registry.reregister(&mut self.stream, self.token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

/// A connection terminated behind TLS.
pub struct TlsSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    stream: S,
    tls: Box<ServerConnection>,
    token: Token,
    engine: Engine,
    pending_write: Vec<u8>,
    closed: bool,
}

impl<S> TlsSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Wraps `stream` behind a fresh `rustls` server session.
    pub fn new(token: Token, stream: S, tls: ServerConnection) -> Self {
        TlsSession {
            stream,
            tls: Box::new(tls),
            token,
            engine: Engine::new(),
            pending_write: Vec::new(),
            closed: false,
        }
    }

    fn interest(&self) -> Interest {
        let read = self.tls.wants_read();
        let write = self.tls.wants_write() || !self.pending_write.is_empty();
        match (read, write) {
            (_, true) if !read => Interest::WRITABLE,
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            _ => Interest::READABLE,
        }
    }
}

impl<S> Connection for TlsSession<S>
where
    S: TcpStream + Read + Write + Source,
{
    fn ready(&mut self, readable: bool, _writable: bool, ctx: &ConnectionContext) -> io::Result<()> {
        if readable {
            loop {
                match self.tls.read_tls(&mut self.stream) {
                    Ok(0) => {
                        self.closed = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }

                match self.tls.process_new_packets() {
                    Ok(state) => {
                        let available = state.plaintext_bytes_to_read();
                        if available > 0 {
                            let mut plaintext = vec![0u8; available];
                            self.tls.reader().read_exact(&mut plaintext)?;
                            if self.engine.feed(&plaintext, ctx, &mut self.pending_write) {
                                self.closed = true;
                            }
                        }
                    }
                    Err(_) => {
                        self.closed = true;
                        break;
                    }
                }
            }
        }

        if !self.pending_write.is_empty() {
            let n = self.tls.writer().write(&self.pending_write)?;
            self.pending_write.drain(..n);
        }

        if self.tls.wants_write() {
            match self.tls.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed && self.pending_write.is_empty() && !self.tls.wants_write()
    }

    fn token(&self) -> Token {
        self.token
    }

    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.interest();
        registry.register(&mut self.stream, self.token, interest)
    }

    fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.interest();
        registry.reregister(&mut self.stream, self.token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::pool::BufferPool;
    use crate::metrics::NullSink;
    use crate::middleware::{BearerAuthMiddleware, Chain};
    use crate::router::{Route, Router};
    use crate::upstream::UpstreamPool;
    use std::collections::HashMap;
    use std::io::BufRead;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
    use std::sync::Arc;
    use std::thread;

    fn ctx_with(router: Router, middleware: Chain, upstream: UpstreamPool) -> ConnectionContext {
        let pool = BufferPool::new(64, 1);
        ConnectionContext::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000),
            &pool,
            Arc::new(router),
            Arc::new(middleware),
            Arc::new(NullSink),
            Arc::new(upstream),
        )
    }

    #[test]
    fn unknown_protocol_waits_for_more_bytes() {
        let ctx = ctx_with(Router::new(Vec::new()), Chain::new(Vec::new()), UpstreamPool::new(HashMap::new()).unwrap());
        let mut engine = Engine::new();
        let mut out = Vec::new();
        assert!(!engine.feed(b"PRI * HTTP", &ctx, &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn no_route_yields_404() {
        let ctx = ctx_with(Router::new(Vec::new()), Chain::new(Vec::new()), UpstreamPool::new(HashMap::new()).unwrap());
        let mut engine = Engine::new();
        let mut out = Vec::new();
        engine.feed(b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", &ctx, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn middleware_rejection_short_circuits_routing() {
        let router = Router::new(vec![Route::new(None, "/secret", "upstream")]);
        let chain = Chain::new(vec![Box::new(BearerAuthMiddleware::new("token"))]);
        let ctx = ctx_with(router, chain, UpstreamPool::new(HashMap::new()).unwrap());
        let mut engine = Engine::new();
        let mut out = Vec::new();
        engine.feed(b"GET /secret HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", &ctx, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 401"));
    }

    #[test]
    fn matched_route_forwards_to_upstream_and_relays_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "GET / HTTP/1.1\r\n");
            let mut stream = stream;
            stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
        });

        let mut configs = HashMap::new();
        configs.insert(
            "echo".to_string(),
            crate::config::UpstreamConfig { address: addr.to_string(), connect_timeout_ms: 1000 },
        );
        let router = Router::new(vec![Route::new(None, "/", "echo")]);
        let ctx = ctx_with(router, Chain::new(Vec::new()), UpstreamPool::new(configs).unwrap());

        let mut engine = Engine::new();
        let mut out = Vec::new();
        engine.feed(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", &ctx, &mut out);
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        server.join().unwrap();
    }

    #[test]
    fn connection_close_header_ends_the_engine_session() {
        let ctx = ctx_with(Router::new(Vec::new()), Chain::new(Vec::new()), UpstreamPool::new(HashMap::new()).unwrap());
        let mut engine = Engine::new();
        let mut out = Vec::new();
        let close = engine.feed(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", &ctx, &mut out);
        assert!(close);
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        let ctx = ctx_with(Router::new(Vec::new()), Chain::new(Vec::new()), UpstreamPool::new(HashMap::new()).unwrap());
        let mut engine = Engine::new();
        let mut out = Vec::new();
        let close = engine.feed(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n", &ctx, &mut out);
        assert!(!close);
    }
}
