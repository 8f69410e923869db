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

//! Upstream dispatch: proxies a parsed request to its configured backend
//! over a fresh, short-lived TCP connection and relays the raw response
//! bytes back unmodified.
//!
//! Each named upstream serializes its own connection attempts behind a
//! mutex, so a backend that's down doesn't get hammered by every worker
//! thread reconnecting at once; requests to different upstreams never
//! contend with each other.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::http1::Request;

struct UpstreamEntry {
    address: SocketAddr,
    connect_timeout: Duration,
    /// Held for the duration of connecting, not of the whole request, so a
    /// slow backend serializes reconnect storms without serializing the
    /// actual request/response transfer.
    connect_lock: Mutex<()>,
}

/// The set of backends routes may proxy to, keyed by the name used in
/// [`crate::config::RouteConfig::upstream`].
pub struct UpstreamPool {
    entries: DashMap<String, UpstreamEntry>,
}

impl UpstreamPool {
    /// Resolves every configured upstream's address up front, so a typo in
    /// the config file fails at startup rather than on the first request.
    pub fn new(configs: HashMap<String, UpstreamConfig>) -> GatewayResult<Self> {
        let entries = DashMap::new();
        for (name, config) in configs {
            let address = config
                .address
                .to_socket_addrs()
                .map_err(|e| GatewayError::Config(format!("resolving upstream {name}: {e}")))?
                .next()
                .ok_or_else(|| GatewayError::Config(format!("upstream {name} resolved to no addresses")))?;

            entries.insert(
                name,
                UpstreamEntry {
                    address,
                    connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                    connect_lock: Mutex::new(()),
                },
            );
        }
        Ok(UpstreamPool { entries })
    }

    /// Proxies `request` to the named upstream, returning the raw bytes of
    /// its response (status line, headers, and body) unparsed.
    pub fn forward(&self, name: &str, request: &Request) -> GatewayResult<Vec<u8>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| GatewayError::Config(format!("no upstream named {name}")))?;

        let stream = {
            let _guard = entry.connect_lock.lock().unwrap();
            TcpStream::connect_timeout(&entry.address, entry.connect_timeout)
                .map_err(|source| GatewayError::Upstream { target: name.to_string(), source })?
        };
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(|source| GatewayError::Upstream { target: name.to_string(), source })?;

        let mut stream = stream;
        write_request(&mut stream, request)
            .map_err(|source| GatewayError::Upstream { target: name.to_string(), source })?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .map_err(|source| GatewayError::Upstream { target: name.to_string(), source })?;
        Ok(response)
    }
}

fn write_request<W: Write>(out: &mut W, request: &Request) -> std::io::Result<()> {
    write!(out, "{} {} {}\r\n", request.method, request.target, request.version)?;
    for (name, value) in &request.headers {
        write!(out, "{name}: {value}\r\n")?;
    }
    out.write_all(b"\r\n")?;
    out.write_all(&request.body)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Method, Version};
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    fn request(target: &str) -> Request {
        Request {
            method: Method::Get,
            target: target.to_string(),
            version: Version::H1_1,
            headers: vec![("Host".to_string(), "example.com".to_string())],
            body: Vec::new(),
        }
    }

    #[test]
    fn forward_relays_backend_response_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "GET /hello HTTP/1.1\r\n");

            let mut stream = stream;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
                .unwrap();
        });

        let mut configs = HashMap::new();
        configs.insert(
            "api".to_string(),
            UpstreamConfig { address: addr.to_string(), connect_timeout_ms: 1_000 },
        );
        let pool = UpstreamPool::new(configs).unwrap();

        let response = pool.forward("api", &request("/hello")).unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        server.join().unwrap();
    }

    #[test]
    fn forward_to_unknown_upstream_is_a_config_error() {
        let pool = UpstreamPool::new(HashMap::new()).unwrap();
        assert!(pool.forward("missing", &request("/")).is_err());
    }
}
