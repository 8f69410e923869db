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

//! Socket listener: owns one `mio::Poll` and its table of live connections.
//!
//! A listener never hands connections off to another thread. It accepts,
//! registers, services readiness events, and closes — all from whichever
//! [`crate::pool::ThreadPool`] worker runs [`Listener::run`]. Each worker in
//! the pool runs one listener's `run` loop for as long as the process is up,
//! which deliberately opts that worker out of the pool's work-stealing: the
//! thread pool is used here purely as NUMA-pinned thread spawner, not as a
//! job queue the listener shares with anything else.

use std::io::{ErrorKind, Read, Result, Write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{event::Source, Events, Interest, Poll, Token};
use rustls::ServerConfig;
use slab::Slab;
use tracing::{debug, warn};

use crate::buffer::pool::BufferPool;
use crate::connection::{Connection, ConnectionBuilder};
use crate::context::ConnectionContext;
use crate::metrics::MetricsSink;
use crate::middleware::Chain;
use crate::net::{tcp_listener::TcpListener, tcp_stream::TcpStream};
use crate::router::Router;
use crate::upstream::UpstreamPool;

const LISTEN_TOKEN: Token = Token(usize::MAX);
/// How often the event loop wakes up even with nothing to do, so it can
/// notice `shutdown` was raised instead of blocking in `poll` forever.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Read-only services every connection accepted by a listener needs a
/// handle to. Built once at startup and shared across every listener
/// thread.
#[derive(Clone)]
pub struct ListenerServices {
    /// TLS server configuration; `None` means this listener terminates
    /// plaintext connections only.
    pub tls: Option<Arc<ServerConfig>>,
    /// Pool connections check read/write scratch buffers out of.
    pub buffers: Arc<BufferPool>,
    /// Route table.
    pub router: Arc<Router>,
    /// Middleware chain run ahead of routing.
    pub middleware: Arc<Chain>,
    /// Metrics sink.
    pub metrics: Arc<dyn MetricsSink>,
    /// Backends routes proxy to.
    pub upstream: Arc<UpstreamPool>,
}

struct Entry {
    conn: Box<dyn Connection>,
    ctx: ConnectionContext,
}

/// Owns one accepting socket, its `Poll`, and the connections accepted from
/// it.
pub struct Listener<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source,
{
    inner: T,
    num_events: usize,
    poll: Poll,
    connections: Slab<Entry>,
    services: ListenerServices,
    _marker: PhantomData<S>,
}

impl<T, S> Listener<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + Read + Write + Source + 'static,
{
    /// Registers `tcp_listener` for accept readiness and returns a listener
    /// ready to [`run`](Self::run).
    pub fn new(mut tcp_listener: T, services: ListenerServices) -> Self {
        let poll = Poll::new().expect("failed to create mio Poll");
        poll.registry()
            .register(&mut tcp_listener, LISTEN_TOKEN, Interest::READABLE)
            .expect("failed to register listening socket");

        Listener {
            inner: tcp_listener,
            num_events: 1024,
            poll,
            connections: Slab::default(),
            services,
            _marker: PhantomData,
        }
    }

    fn accept(&mut self) -> Result<()> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer_addr)) => {
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());

                    let mut conn: Box<dyn Connection> = match &self.services.tls {
                        Some(tls_config) => {
                            match ConnectionBuilder::new(stream, token).with_tls(tls_config.clone()) {
                                Ok(session) => Box::new(session),
                                Err(err) => {
                                    warn!(%err, "rejecting connection: invalid TLS configuration");
                                    continue;
                                }
                            }
                        }
                        None => Box::new(ConnectionBuilder::new(stream, token).with_plaintext()),
                    };

                    if let Err(err) = conn.register(self.poll.registry()) {
                        warn!(%err, "failed to register accepted connection");
                        continue;
                    }

                    let ctx = ConnectionContext::new(
                        peer_addr,
                        &self.services.buffers,
                        self.services.router.clone(),
                        self.services.middleware.clone(),
                        self.services.metrics.clone(),
                        self.services.upstream.clone(),
                    );

                    entry.insert(Entry { conn, ctx });
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn event(&mut self, event: &mio::event::Event) {
        let token = event.token();
        let registry = self.poll.registry();

        let Some(entry) = self.connections.get_mut(token.0) else { return };

        let result = entry.conn.ready(event.is_readable(), event.is_writable(), &entry.ctx);
        let closed = result.is_err() || entry.conn.is_closed();

        if closed {
            if let Err(err) = result {
                debug!(%err, "connection closed with error");
            }
            let _ = entry.conn.deregister(registry);
            self.connections.try_remove(token.0);
        } else if let Err(err) = entry.conn.reregister(registry) {
            warn!(%err, "failed to reregister connection interest");
        }
    }

    /// Runs the listener's event loop until `shutdown` is set. Waking on a
    /// timeout rather than blocking forever in `poll` is what lets this loop
    /// notice the flag at all.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let mut events = Events::with_capacity(self.num_events);

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                warn!(%err, "listener poll failed, shutting down");
                return;
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => {
                        if let Err(err) = self.accept() {
                            warn!(%err, "accept failed");
                        }
                    }
                    _ => self.event(event),
                }
            }
        }

        debug!("listener shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullSink;
    use std::collections::HashMap;
    use std::net::TcpListener as StdTcpListener;

    fn services() -> ListenerServices {
        ListenerServices {
            tls: None,
            buffers: BufferPool::new(4096, 16),
            router: Arc::new(Router::new(Vec::new())),
            middleware: Arc::new(Chain::new(Vec::new())),
            metrics: Arc::new(NullSink),
            upstream: Arc::new(UpstreamPool::new(HashMap::new()).unwrap()),
        }
    }

    #[test]
    fn new_registers_the_listening_socket() {
        let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let mio_listener = mio::net::TcpListener::from_std(std_listener);
        let listener = Listener::new(mio_listener, services());
        assert_eq!(listener.connections.len(), 0);
    }

    #[test]
    fn accept_with_no_pending_connections_is_a_noop() {
        let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let mio_listener = mio::net::TcpListener::from_std(std_listener);
        let mut listener = Listener::new(mio_listener, services());
        listener.accept().unwrap();
        assert_eq!(listener.connections.len(), 0);
    }
}
