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

//! Per-connection state shared across a connection's lifetime: its pooled
//! I/O buffers, the shared read-only services it dispatches requests to, and
//! the bookkeeping needed to report metrics when it closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::pool::{BufferPool, PooledBuffer};
use crate::metrics::MetricsSink;
use crate::middleware::Chain;
use crate::router::Router;
use crate::upstream::UpstreamPool;

/// Everything a connection needs beyond its raw socket: buffers on loan from
/// the shared pool, and `Arc`-shared handles to services built once at
/// startup and never mutated afterward.
pub struct ConnectionContext {
    /// Scratch space for incoming bytes not yet parsed into a full request.
    pub read_buf: PooledBuffer,
    /// Scratch space for outgoing bytes not yet flushed to the socket.
    pub write_buf: PooledBuffer,
    /// Route table, shared read-only across every connection.
    pub router: Arc<Router>,
    /// Middleware chain run before a route's handler.
    pub middleware: Arc<Chain>,
    /// Metrics sink requests and connection lifecycle events report to.
    pub metrics: Arc<dyn MetricsSink>,
    /// Backends routes proxy to.
    pub upstream: Arc<UpstreamPool>,
    /// Address of the connected peer.
    pub peer_addr: SocketAddr,
    /// When the connection was accepted, for reporting its lifetime on close.
    opened_at: Instant,
}

impl ConnectionContext {
    /// Builds a new context for a freshly accepted connection, checking out
    /// a read and write buffer from `buffers` and reporting the accept to
    /// `metrics`.
    pub fn new(
        peer_addr: SocketAddr,
        buffers: &Arc<BufferPool>,
        router: Arc<Router>,
        middleware: Arc<Chain>,
        metrics: Arc<dyn MetricsSink>,
        upstream: Arc<UpstreamPool>,
    ) -> Self {
        metrics.connection_opened();
        ConnectionContext {
            read_buf: buffers.checkout(),
            write_buf: buffers.checkout(),
            router,
            middleware,
            metrics,
            upstream,
            peer_addr,
            opened_at: Instant::now(),
        }
    }

    /// How long this connection has been open.
    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.metrics.connection_closed(self.opened_at.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullSink;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080)
    }

    fn no_upstreams() -> Arc<UpstreamPool> {
        Arc::new(UpstreamPool::new(HashMap::new()).unwrap())
    }

    #[test]
    fn new_checks_out_distinct_buffers_and_reports_open() {
        let pool = BufferPool::new(1024, 4);
        let ctx = ConnectionContext::new(
            addr(),
            &pool,
            Arc::new(Router::new(Vec::new())),
            Arc::new(Chain::new(Vec::new())),
            Arc::new(NullSink),
            no_upstreams(),
        );
        assert_eq!(ctx.read_buf.as_slice().len(), 1024);
        assert_eq!(ctx.write_buf.as_slice().len(), 1024);
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn drop_returns_buffers_to_pool() {
        let pool = BufferPool::new(1024, 4);
        let ctx = ConnectionContext::new(
            addr(),
            &pool,
            Arc::new(Router::new(Vec::new())),
            Arc::new(Chain::new(Vec::new())),
            Arc::new(NullSink),
            no_upstreams(),
        );
        drop(ctx);
        assert_eq!(pool.idle_len(), 2);
    }

    #[test]
    fn age_increases_monotonically() {
        let pool = BufferPool::new(64, 1);
        let ctx = ConnectionContext::new(
            addr(),
            &pool,
            Arc::new(Router::new(Vec::new())),
            Arc::new(Chain::new(Vec::new())),
            Arc::new(NullSink),
            no_upstreams(),
        );
        let first = ctx.age();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(ctx.age() >= first);
    }
}
