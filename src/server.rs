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

//! Gateway process wiring: turns a loaded [`Config`] into a running set of
//! listeners, one per NUMA node, and blocks until `SIGTERM` or an internal
//! shutdown request flips the shared shutdown flag.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use tracing::info;

use crate::config::{Config, RouteConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::listener::{Listener, ListenerServices};
use crate::logging;
use crate::metrics::{MetricsSink, PrometheusSink};
use crate::middleware::{BearerAuthMiddleware, Chain, Middleware, RateLimitMiddleware};
use crate::net;
use crate::parser::Method;
use crate::pool::ThreadPool;
use crate::router::{Route, Router};
use crate::topology::Topology;
use crate::upstream::UpstreamPool;

/// How often the main thread wakes up to check the shutdown flag while
/// listeners run on the pool.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Owns every service built from [`Config`] and drives the gateway's
/// lifetime from startup to shutdown.
pub struct Gateway {
    config: Config,
    metrics: Arc<PrometheusSink>,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    /// Builds every startup-time service (metrics registry included) from
    /// `config`, without yet binding a socket or spawning threads.
    pub fn new(config: Config) -> GatewayResult<Self> {
        let metrics =
            Arc::new(PrometheusSink::new().map_err(|e| GatewayError::Internal(e.to_string()))?);
        Ok(Gateway {
            config,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle that, when set, stops every listener's event loop and
    /// returns control from [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Binds the listen socket once per NUMA node, runs one listener per
    /// node on the thread pool, and blocks until shutdown is requested.
    pub fn run(self) -> GatewayResult<()> {
        logging::init(&self.config.log_level);

        let routes = build_routes(&self.config.routes)?;
        let router = Arc::new(Router::new(routes));
        let chain = Arc::new(Chain::new(build_middlewares(&self.config)));
        let buffers = crate::buffer::pool::BufferPool::new(64 * 1024, 256);

        let tls = match (&self.config.listen.tls_cert_path, &self.config.listen.tls_key_path) {
            (Some(cert), Some(key)) => Some(load_tls_config(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(GatewayError::Config(
                    "tls_cert_path and tls_key_path must be set together".to_string(),
                ))
            }
        };

        let addr: SocketAddr = format!("{}:{}", self.config.listen.address, self.config.listen.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid listen address: {e}")))?;

        let upstream = Arc::new(UpstreamPool::new(self.config.upstreams)?);
        let metrics: Arc<dyn MetricsSink> = self.metrics.clone();

        let services = ListenerServices {
            tls,
            buffers,
            router,
            middleware: chain,
            metrics,
            upstream,
        };

        let topology = Topology::discover();
        let pool = ThreadPool::new(&topology);

        signal_hook::flag::register(signal_hook::consts::SIGTERM, self.shutdown.clone())
            .map_err(|e| GatewayError::Internal(format!("registering SIGTERM handler: {e}")))?;

        for node in 0..pool.node_count() {
            let socket = net::bind_reuseport(addr, 1024)
                .map_err(|e| GatewayError::Config(format!("binding {addr}: {e}")))?;
            let services = services.clone();
            let shutdown = self.shutdown.clone();
            pool.submit(
                node,
                Box::new(move || {
                    let mut listener = Listener::new(socket, services);
                    listener.run(&shutdown);
                }),
            );
        }

        info!(%addr, nodes = pool.node_count(), "gateway listening");

        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }

        info!("shutdown requested, draining listeners");
        pool.shutdown();
        Ok(())
    }
}

fn build_routes(configs: &[RouteConfig]) -> GatewayResult<Vec<Route>> {
    configs
        .iter()
        .map(|rc| {
            let method = match &rc.method {
                Some(m) => Some(
                    Method::from_bytes(m.as_bytes())
                        .ok_or_else(|| GatewayError::Config(format!("unknown HTTP method {m}")))?,
                ),
                None => None,
            };
            Ok(Route::new(method, &rc.path, rc.upstream.clone()))
        })
        .collect()
}

fn build_middlewares(config: &Config) -> Vec<Box<dyn Middleware>> {
    let mut middlewares: Vec<Box<dyn Middleware>> = Vec::new();
    if let Some(rate_limit) = &config.rate_limit {
        middlewares.push(Box::new(RateLimitMiddleware::new(
            rate_limit.capacity,
            Duration::from_secs(rate_limit.window_seconds),
        )));
    }
    if let Some(token) = &config.auth_token {
        middlewares.push(Box::new(BearerAuthMiddleware::new(token.clone())));
    }
    middlewares
}

fn load_tls_config(cert_path: &str, key_path: &str) -> GatewayResult<Arc<ServerConfig>> {
    let cert_file = File::open(cert_path)
        .map_err(|e| GatewayError::Config(format!("reading TLS cert {cert_path}: {e}")))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Config(format!("parsing TLS cert {cert_path}: {e}")))?;

    let key_file = File::open(key_path)
        .map_err(|e| GatewayError::Config(format!("reading TLS key {key_path}: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| GatewayError::Config(format!("parsing TLS key {key_path}: {e}")))?
        .ok_or_else(|| GatewayError::Config(format!("no private key found in {key_path}")))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Config(format!("building TLS config: {e}")))?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_routes_rejects_unknown_methods() {
        let configs = vec![RouteConfig {
            method: Some("FETCH".to_string()),
            path: "/x".to_string(),
            upstream: "api".to_string(),
        }];
        assert!(build_routes(&configs).is_err());
    }

    #[test]
    fn build_routes_accepts_wildcard_method() {
        let configs = vec![RouteConfig {
            method: None,
            path: "/x".to_string(),
            upstream: "api".to_string(),
        }];
        let routes = build_routes(&configs).unwrap();
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn build_middlewares_is_empty_with_no_policy_configured() {
        let config = Config {
            listen: crate::config::ListenConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
                tls_cert_path: None,
                tls_key_path: None,
            },
            routes: Vec::new(),
            upstreams: std::collections::HashMap::new(),
            rate_limit: None,
            auth_token: None,
            log_level: "rask_gateway=info".to_string(),
        };
        assert!(build_middlewares(&config).is_empty());
    }
}
